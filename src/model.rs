use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

pub const PLACEHOLDER_NO_DATA: &str = "--";
pub const PLACEHOLDER_ERROR: &str = "Error";

/// Which disk-statistics stream a key refers to. The aggregate is its own
/// variant so a device literally named "All" cannot collide with it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskTarget {
    All,
    Device(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Eth,
    Wlan,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MetricKey {
    Cpu,
    CpuFrequency,
    LoadAverage,
    Ram,
    Swap,
    DiskStats(DiskTarget),
    DiskSpace(String),
    NetEth,
    NetWlan,
    CpuTemperature(String),
    GpuUsage(String),
    GpuMemory(String),
}

impl MetricKey {
    /// Streams derived from two successive cumulative samples.
    pub fn is_cumulative(&self) -> bool {
        matches!(
            self,
            MetricKey::Cpu | MetricKey::DiskStats(_) | MetricKey::NetEth | MetricKey::NetWlan
        )
    }

    pub fn link(&self) -> Option<LinkKind> {
        match self {
            MetricKey::NetEth => Some(LinkKind::Eth),
            MetricKey::NetWlan => Some(LinkKind::Wlan),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::Cpu => write!(f, "cpu"),
            MetricKey::CpuFrequency => write!(f, "cpu_frequency"),
            MetricKey::LoadAverage => write!(f, "load_average"),
            MetricKey::Ram => write!(f, "ram"),
            MetricKey::Swap => write!(f, "swap"),
            MetricKey::DiskStats(DiskTarget::All) => write!(f, "disk_stats[all]"),
            MetricKey::DiskStats(DiskTarget::Device(d)) => write!(f, "disk_stats:{d}"),
            MetricKey::DiskSpace(d) => write!(f, "disk_space:{d}"),
            MetricKey::NetEth => write!(f, "net_eth"),
            MetricKey::NetWlan => write!(f, "net_wlan"),
            MetricKey::CpuTemperature(s) => write!(f, "cpu_temperature:{s}"),
            MetricKey::GpuUsage(g) => write!(f, "gpu_usage:{g}"),
            MetricKey::GpuMemory(g) => write!(f, "gpu_memory:{g}"),
        }
    }
}

/// Raw counter fields captured for one key at one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Counters {
    Flat(Vec<u64>),
    /// Per-device `[read, write]` counters, used by the all-disks aggregate.
    PerDevice(BTreeMap<String, [u64; 2]>),
}

#[derive(Clone, Debug)]
pub struct CounterSample {
    pub counters: Counters,
    pub taken_at: Instant,
}

impl CounterSample {
    pub fn new(counters: Counters, taken_at: Instant) -> Self {
        Self { counters, taken_at }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormattedMetric {
    pub key: MetricKey,
    pub value: String,
    pub unit: String,
    pub visible: bool,
}

impl FormattedMetric {
    pub fn new(key: MetricKey, value: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            unit: unit.into(),
            visible: true,
        }
    }

    pub fn no_data(key: MetricKey) -> Self {
        Self::new(key, PLACEHOLDER_NO_DATA, "")
    }

    pub fn error(key: MetricKey) -> Self {
        Self::new(key, PLACEHOLDER_ERROR, "")
    }

    pub fn is_placeholder(&self) -> bool {
        self.value == PLACEHOLDER_NO_DATA || self.value == PLACEHOLDER_ERROR
    }
}

/// Everything published for one tick. Not retained by the engine.
#[derive(Clone, Debug, Default)]
pub struct MetricFrame {
    pub metrics: BTreeMap<MetricKey, FormattedMetric>,
}

impl MetricFrame {
    pub fn insert(&mut self, metric: FormattedMetric) {
        self.metrics.insert(metric.key.clone(), metric);
    }

    pub fn get(&self, key: &MetricKey) -> Option<&FormattedMetric> {
        self.metrics.get(key)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn visible(&self) -> impl Iterator<Item = &FormattedMetric> {
        self.metrics.values().filter(|m| m.visible)
    }
}

impl Serialize for MetricFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.metrics.values())
    }
}
