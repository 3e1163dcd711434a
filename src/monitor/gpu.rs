use super::run_command;
use crate::{Error, Result};
use std::time::Duration;

/// One row of the GPU query: `uuid, utilization %, total MiB, used MiB, free MiB`.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuStats {
    pub uuid: String,
    pub usage_percent: Option<f64>,
    pub memory_total_mib: u64,
    pub memory_used_mib: u64,
    pub memory_free_mib: u64,
}

impl GpuStats {
    pub fn memory_used_percent(&self) -> f64 {
        if self.memory_total_mib == 0 {
            0.0
        } else {
            100.0 * self.memory_used_mib as f64 / self.memory_total_mib as f64
        }
    }
}

fn mib(field: &str) -> Result<u64> {
    field
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("gpu: invalid memory value {:?}", field.trim())))
}

pub fn parse_query(raw: &str) -> Result<Vec<GpuStats>> {
    let mut gpus = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() < 5 {
            return Err(Error::Parse(format!("gpu: short line {:?}", line)));
        }
        gpus.push(GpuStats {
            uuid: cols[0].to_string(),
            // "[Not Supported]" on some boards
            usage_percent: cols[1].parse().ok(),
            memory_total_mib: mib(cols[2])?,
            memory_used_mib: mib(cols[3])?,
            memory_free_mib: mib(cols[4])?,
        });
    }
    Ok(gpus)
}

pub async fn query(command: &[String], timeout: Duration) -> Result<Vec<GpuStats>> {
    parse_query(&run_command(command, timeout).await?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub uuid: String,
}

/// Parses device listings of the form `GPU 0: Name (UUID: GPU-...)`.
pub fn parse_list(raw: &str) -> Vec<GpuDevice> {
    raw.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("GPU ")?;
            let (index, rest) = rest.split_once(':')?;
            let (name, uuid) = rest.rsplit_once('(')?;
            let uuid = uuid.trim_end_matches(')').trim();
            let uuid = uuid.strip_prefix("UUID:").unwrap_or(uuid).trim();
            Some(GpuDevice {
                index: index.trim().parse().ok()?,
                name: name.trim().to_string(),
                uuid: uuid.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_rows() {
        let raw = "GPU-aaaa, 37, 10240, 2048, 8192\nGPU-bbbb, [Not Supported], 4096, 1024, 3072\n";
        let gpus = parse_query(raw).unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].usage_percent, Some(37.0));
        assert_eq!(gpus[0].memory_used_percent(), 20.0);
        assert_eq!(gpus[1].usage_percent, None);
        assert_eq!(gpus[1].memory_free_mib, 3072);
    }

    #[test]
    fn rejects_bad_query_rows() {
        assert!(parse_query("GPU-a, 1, 2").is_err());
        assert!(parse_query("GPU-a, 1, x, 2, 3").is_err());
        assert!(parse_query("\n").unwrap().is_empty());
    }

    #[test]
    fn parses_device_list() {
        let raw = "GPU 0: NVIDIA GeForce RTX 3080 (UUID: GPU-12ab-34cd)\nGPU 1: Tesla T4 (UUID: GPU-ffff)\nNo devices\n";
        let list = parse_list(raw);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].index, 0);
        assert_eq!(list[0].name, "NVIDIA GeForce RTX 3080");
        assert_eq!(list[0].uuid, "GPU-12ab-34cd");
        assert_eq!(list[1].uuid, "GPU-ffff");
    }
}
