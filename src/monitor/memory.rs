use super::read_source;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Fields of `/proc/meminfo`, in kilobytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_available: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * used as f64 / total as f64
    }
}

impl MemInfo {
    pub fn ram_used(&self) -> u64 {
        self.mem_total.saturating_sub(self.mem_available)
    }

    pub fn ram_used_percent(&self) -> f64 {
        percent(self.ram_used(), self.mem_total)
    }

    pub fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }

    pub fn swap_used_percent(&self) -> f64 {
        percent(self.swap_used(), self.swap_total)
    }
}

pub fn parse_meminfo(raw: &str) -> Result<MemInfo> {
    let mut fields = HashMap::new();
    for line in raw.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(Ok(value)) = rest.split_whitespace().next().map(str::parse::<u64>) {
            fields.insert(name.trim(), value);
        }
    }

    let mem_total = *fields
        .get("MemTotal")
        .ok_or_else(|| Error::Parse("meminfo: missing MemTotal".into()))?;
    // Kernels before 3.14 have no MemAvailable.
    let mem_available = match fields.get("MemAvailable") {
        Some(v) => *v,
        None => ["MemFree", "Buffers", "Cached"]
            .iter()
            .filter_map(|k| fields.get(k))
            .sum(),
    };

    Ok(MemInfo {
        mem_total,
        mem_available,
        swap_total: fields.get("SwapTotal").copied().unwrap_or(0),
        swap_free: fields.get("SwapFree").copied().unwrap_or(0),
    })
}

pub async fn read(proc_root: &Path, timeout: Duration) -> Result<MemInfo> {
    parse_meminfo(&read_source(&proc_root.join("meminfo"), timeout).await?)
}
