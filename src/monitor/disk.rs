use super::{parse_u64, read_source, run_command};
use crate::model::Counters;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use sysinfo::Disks;

/// `/proc/diskstats` always counts in 512-byte sectors.
pub const SECTOR_BYTES: u64 = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskIo {
    pub name: String,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

impl DiskIo {
    pub fn counters(&self) -> Counters {
        Counters::Flat(vec![self.sectors_read, self.sectors_written])
    }
}

pub fn parse_diskstats(raw: &str) -> Result<Vec<DiskIo>> {
    let mut disks = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 10 {
            return Err(Error::Parse(format!("diskstats: short line {:?}", line.trim())));
        }
        disks.push(DiskIo {
            name: cols[2].to_string(),
            sectors_read: parse_u64(cols[5], "diskstats read")?,
            sectors_written: parse_u64(cols[9], "diskstats written")?,
        });
    }
    Ok(disks)
}

/// `sda1` matches a configured `sda1` or `/dev/sda1`.
pub fn matches_device(configured: &str, name: &str) -> bool {
    configured == name
        || configured
            .strip_suffix(name)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

pub fn find_io<'a>(disks: &'a [DiskIo], configured: &str) -> Option<&'a DiskIo> {
    disks
        .iter()
        .find(|d| d.name == configured)
        .or_else(|| disks.iter().find(|d| matches_device(configured, &d.name)))
}

fn is_virtual(name: &str) -> bool {
    ["loop", "ram", "zram"].iter().any(|p| name.starts_with(p))
}

/// Whole-disk block devices listed under `/sys/block`, or `None` when sysfs
/// cannot be read.
pub async fn whole_disks(sys_root: &Path) -> Option<BTreeSet<String>> {
    let mut entries = tokio::fs::read_dir(sys_root.join("block")).await.ok()?;
    let mut names = BTreeSet::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Some(names)
}

/// Per-device counters feeding the all-disks aggregate. Partitions are left
/// out when the whole-disk list is known so nothing is counted twice.
pub fn aggregate(disks: &[DiskIo], whole: Option<&BTreeSet<String>>) -> Counters {
    let devices: BTreeMap<String, [u64; 2]> = disks
        .iter()
        .filter(|d| !is_virtual(&d.name))
        .filter(|d| whole.map_or(true, |w| w.contains(&d.name)))
        .map(|d| (d.name.clone(), [d.sectors_read, d.sectors_written]))
        .collect();
    Counters::PerDevice(devices)
}

pub async fn read_io(proc_root: &Path, timeout: Duration) -> Result<Vec<DiskIo>> {
    parse_diskstats(&read_source(&proc_root.join("diskstats"), timeout).await?)
}

/// One row of `df -P -k` output; sizes in KiB.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskSpace {
    pub filesystem: String,
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
    /// `None` when df printed no capacity and none can be derived.
    pub used_percent: Option<f64>,
    pub mount_point: String,
}

pub fn parse_df(raw: &str) -> Result<Vec<DiskSpace>> {
    let mut rows = Vec::new();
    for line in raw.lines().skip(1).filter(|l| !l.trim().is_empty()) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 6 {
            return Err(Error::Parse(format!("df: short line {:?}", line)));
        }
        let used_kb = parse_u64(cols[2], "df used")?;
        let available_kb = parse_u64(cols[3], "df available")?;
        let used_percent = cols[4]
            .trim_end_matches('%')
            .parse::<f64>()
            .ok()
            .or_else(|| derived_percent(used_kb, available_kb));
        rows.push(DiskSpace {
            filesystem: cols[0].to_string(),
            total_kb: parse_u64(cols[1], "df total")?,
            used_kb,
            available_kb,
            used_percent,
            mount_point: cols[5..].join(" "),
        });
    }
    Ok(rows)
}

// df's capacity column is used / (used + available), rounded up.
fn derived_percent(used_kb: u64, available_kb: u64) -> Option<f64> {
    let usable = used_kb.checked_add(available_kb).filter(|u| *u > 0)?;
    Some((used_kb as f64 * 100.0 / usable as f64).ceil())
}

/// Exact filesystem match first; `/dev/sda1` also answers to `sda1`.
pub fn find_space<'a>(rows: &'a [DiskSpace], configured: &str) -> Option<&'a DiskSpace> {
    rows.iter()
        .find(|r| r.filesystem == configured)
        .or_else(|| rows.iter().find(|r| matches_device(&r.filesystem, configured)))
}

pub async fn read_space(df_command: &[String], timeout: Duration) -> Result<Vec<DiskSpace>> {
    parse_df(&run_command(df_command, timeout).await?)
}

#[derive(Clone, Debug)]
pub struct DiscoveredDisk {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total_bytes: u64,
}

pub fn discover() -> Vec<DiscoveredDisk> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .map(|d| DiscoveredDisk {
            name: d.name().to_string_lossy().to_string(),
            mount_point: d.mount_point().to_string_lossy().to_string(),
            file_system: d.file_system().to_string_lossy().to_string(),
            total_bytes: d.total_space(),
        })
        .collect()
}
