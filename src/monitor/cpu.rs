use super::{parse_u64, read_source};
use crate::model::Counters;
use crate::{Error, Result};
use log::debug;
use std::path::Path;
use std::time::Duration;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

/// Cumulative clock ticks from the aggregate `cpu` line of `/proc/stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.checked_total().unwrap_or(u64::MAX)
    }

    fn checked_total(&self) -> Option<u64> {
        self.user
            .checked_add(self.nice)?
            .checked_add(self.system)?
            .checked_add(self.idle)
    }

    pub fn counters(&self) -> Counters {
        Counters::Flat(vec![self.total(), self.idle])
    }
}

pub fn parse_stat(raw: &str) -> Result<CpuTimes> {
    let line = raw
        .lines()
        .next()
        .filter(|l| l.starts_with("cpu "))
        .ok_or_else(|| Error::Parse("stat: missing aggregate cpu line".into()))?;
    let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
    if fields.len() < 4 {
        return Err(Error::Parse(format!("stat: short cpu line {:?}", line)));
    }
    let times = CpuTimes {
        user: parse_u64(fields[0], "stat user")?,
        nice: parse_u64(fields[1], "stat nice")?,
        system: parse_u64(fields[2], "stat system")?,
        idle: parse_u64(fields[3], "stat idle")?,
        iowait: fields
            .get(4)
            .map(|f| parse_u64(f, "stat iowait"))
            .transpose()?
            .unwrap_or(0),
    };
    if times.checked_total().is_none() {
        return Err(Error::Parse(format!("stat: cpu total overflows in {:?}", line)));
    }
    Ok(times)
}

pub async fn read(proc_root: &Path, timeout: Duration) -> Result<CpuTimes> {
    parse_stat(&read_source(&proc_root.join("stat"), timeout).await?)
}

/// One-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(raw: &str) -> Result<f64> {
    raw.split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| Error::Parse(format!("loadavg: unexpected {:?}", raw.trim())))
}

pub async fn read_load_average(proc_root: &Path, timeout: Duration) -> Result<f64> {
    parse_loadavg(&read_source(&proc_root.join("loadavg"), timeout).await?)
}

/// Average current frequency across cores, in MHz. The whole lookup,
/// including the sysinfo fallback, is bounded by `timeout`.
pub async fn read_frequency_mhz(sys_root: &Path, timeout: Duration) -> Result<f64> {
    match tokio::time::timeout(timeout, frequency_mhz(sys_root, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
    }
}

async fn frequency_mhz(sys_root: &Path, timeout: Duration) -> Result<f64> {
    let cpu_dir = sys_root.join("devices/system/cpu");
    let mut khz = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&cpu_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_core = name
                .strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            if !is_core {
                continue;
            }
            let path = entry.path().join("cpufreq/scaling_cur_freq");
            match read_source(&path, timeout).await.and_then(|raw| parse_u64(&raw, "scaling_cur_freq")) {
                Ok(value) => khz.push(value),
                Err(e) => debug!("skipping {}: {}", path.display(), e),
            }
        }
    }

    if !khz.is_empty() {
        let avg = khz.iter().map(|k| *k as f64).sum::<f64>() / khz.len() as f64;
        return Ok(avg / 1000.0);
    }

    // No cpufreq in sysfs (common in VMs); ask sysinfo instead.
    let mhz = tokio::task::spawn_blocking(sysinfo_frequency_mhz)
        .await
        .map_err(|e| Error::Unavailable(format!("frequency lookup: {}", e)))?;
    mhz.ok_or_else(|| Error::Unavailable("cpu frequency not exposed".into()))
}

fn sysinfo_frequency_mhz() -> Option<f64> {
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_frequency()),
    );
    let freqs: Vec<u64> = sys
        .cpus()
        .iter()
        .map(|c| c.frequency())
        .filter(|f| *f > 0)
        .collect();
    if freqs.is_empty() {
        return None;
    }
    Some(freqs.iter().map(|f| *f as f64).sum::<f64>() / freqs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const STAT: &str = "cpu  100 0 50 850 7 0 3 0 0 0\ncpu0 50 0 25 425 3 0 1 0 0 0\nintr 1234\n";

    #[test]
    fn parses_aggregate_line() {
        let times = parse_stat(STAT).unwrap();
        assert_eq!(times.user, 100);
        assert_eq!(times.system, 50);
        assert_eq!(times.idle, 850);
        assert_eq!(times.iowait, 7);
        assert_eq!(times.total(), 1000);
        assert_eq!(times.counters(), Counters::Flat(vec![1000, 850]));
    }

    #[test]
    fn rejects_malformed_stat() {
        assert!(matches!(parse_stat(""), Err(Error::Parse(_))));
        assert!(matches!(parse_stat("cpu0 1 2 3 4"), Err(Error::Parse(_))));
        assert!(matches!(parse_stat("cpu  1 2 x 4"), Err(Error::Parse(_))));
        assert!(matches!(parse_stat("cpu  1 2"), Err(Error::Parse(_))));
    }

    #[test]
    fn overflowing_total_is_a_parse_error() {
        let raw = "cpu  18446744073709551615 1 0 0 0\n";
        assert!(matches!(parse_stat(raw), Err(Error::Parse(_))));
    }

    #[test]
    fn parses_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.48 0.40 1/523 12345\n").unwrap(), 0.52);
        assert!(parse_loadavg("").is_err());
    }

    #[tokio::test]
    async fn averages_scaling_frequency() {
        let tmp = tempdir().unwrap();
        for (cpu, khz) in [("cpu0", "2000000"), ("cpu1", "3000000")] {
            let dir = tmp.path().join("devices/system/cpu").join(cpu).join("cpufreq");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("scaling_cur_freq"), format!("{khz}\n")).unwrap();
        }
        // not a core directory
        fs::create_dir_all(tmp.path().join("devices/system/cpu/cpufreq")).unwrap();

        let mhz = read_frequency_mhz(tmp.path(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(mhz, 2500.0);
    }

    #[tokio::test]
    async fn skips_unreadable_cores() {
        let tmp = tempdir().unwrap();
        for (cpu, khz) in [("cpu0", "1800000"), ("cpu1", "garbage"), ("cpu2", "2200000")] {
            let dir = tmp.path().join("devices/system/cpu").join(cpu).join("cpufreq");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("scaling_cur_freq"), format!("{khz}\n")).unwrap();
        }
        let mhz = read_frequency_mhz(tmp.path(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(mhz, 2000.0);
    }
}
