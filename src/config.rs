use crate::model::{DiskTarget, MetricKey};
use crate::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEVICE_SEPARATOR: char = '|';
const APP_DIR: &str = "resource-monitor";
const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountDisplay {
    Percent,
    Used,
    Free,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetUnit {
    Bytes,
    Bits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetBase {
    Binary,
    Decimal,
}

impl NetBase {
    pub fn value(self) -> f64 {
        match self {
            NetBase::Binary => 1024.0,
            NetBase::Decimal => 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    Mhz,
    Ghz,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskStatsMode {
    Single,
    All,
}

/// Where the kernel sources live. Overridable for containers and fixtures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sources {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub df_command: Vec<String>,
    pub gpu_command: Vec<String>,
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            df_command: vec!["df".into(), "-P".into(), "-k".into()],
            gpu_command: vec![
                "nvidia-smi".into(),
                "--query-gpu=uuid,utilization.gpu,memory.total,memory.used,memory.free".into(),
                "--format=csv,noheader,nounits".into(),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interval_secs: u64,
    pub decimals: bool,
    pub source_timeout_ms: u64,

    pub cpu: bool,
    pub cpu_frequency: bool,
    pub load_average: bool,
    pub ram: bool,
    pub swap: bool,
    pub disk_stats: bool,
    pub disk_stats_mode: DiskStatsMode,
    pub disk_space: bool,
    pub net_eth: bool,
    pub net_wlan: bool,
    pub thermal: bool,
    pub gpu: bool,

    pub memory_display: AmountDisplay,
    pub disk_space_display: AmountDisplay,
    pub net_unit: NetUnit,
    pub net_base: NetBase,
    pub thermal_unit: ThermalUnit,
    pub frequency_unit: FrequencyUnit,

    pub net_auto_hide: bool,
    pub net_eth_always_show: bool,
    pub net_wlan_always_show: bool,

    /// `device|stats|space`
    pub disk_devices: Vec<String>,
    /// `label|path|enabled`
    pub thermal_sensors: Vec<String>,
    /// `uuid|name|usage|memory`
    pub gpu_devices: Vec<String>,

    pub sources: Sources,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            decimals: false,
            source_timeout_ms: 1500,
            cpu: true,
            cpu_frequency: false,
            load_average: false,
            ram: true,
            swap: false,
            disk_stats: true,
            disk_stats_mode: DiskStatsMode::All,
            disk_space: false,
            net_eth: true,
            net_wlan: true,
            thermal: false,
            gpu: false,
            memory_display: AmountDisplay::Percent,
            disk_space_display: AmountDisplay::Percent,
            net_unit: NetUnit::Bytes,
            net_base: NetBase::Binary,
            thermal_unit: ThermalUnit::Celsius,
            frequency_unit: FrequencyUnit::Ghz,
            net_auto_hide: false,
            net_eth_always_show: false,
            net_wlan_always_show: false,
            disk_devices: Vec::new(),
            thermal_sensors: Vec::new(),
            gpu_devices: Vec::new(),
            sources: Sources::default(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(".config")
        });
    base.join(APP_DIR)
}

pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

impl Config {
    /// Loads the user config, falling back to defaults when it is missing or broken.
    pub fn load() -> Self {
        let path = config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms.max(1))
    }

    pub fn decimal_places(&self) -> usize {
        usize::from(self.decimals)
    }

    /// Resolves every key that should be sampled this tick.
    pub fn enabled_keys(&self, devices: &DeviceLists) -> BTreeSet<MetricKey> {
        let mut keys = BTreeSet::new();
        let flags = [
            (self.cpu, MetricKey::Cpu),
            (self.cpu_frequency, MetricKey::CpuFrequency),
            (self.load_average, MetricKey::LoadAverage),
            (self.ram, MetricKey::Ram),
            (self.swap, MetricKey::Swap),
            (self.net_eth, MetricKey::NetEth),
            (self.net_wlan, MetricKey::NetWlan),
        ];
        for (enabled, key) in flags {
            if enabled {
                keys.insert(key);
            }
        }

        if self.disk_stats {
            match self.disk_stats_mode {
                DiskStatsMode::All => {
                    keys.insert(MetricKey::DiskStats(DiskTarget::All));
                }
                DiskStatsMode::Single => {
                    for disk in devices.disks.iter().filter(|d| d.stats) {
                        keys.insert(MetricKey::DiskStats(DiskTarget::Device(disk.device.clone())));
                    }
                }
            }
        }
        if self.disk_space {
            for disk in devices.disks.iter().filter(|d| d.space) {
                keys.insert(MetricKey::DiskSpace(disk.device.clone()));
            }
        }
        if self.thermal {
            for sensor in devices.sensors.iter().filter(|s| s.enabled) {
                keys.insert(MetricKey::CpuTemperature(sensor.label.clone()));
            }
        }
        if self.gpu {
            for gpu in &devices.gpus {
                if gpu.usage {
                    keys.insert(MetricKey::GpuUsage(gpu.uuid.clone()));
                }
                if gpu.memory {
                    keys.insert(MetricKey::GpuMemory(gpu.uuid.clone()));
                }
            }
        }
        keys
    }

    /// Lists which settings differ, in the order a settings collaborator
    /// would have notified them.
    pub fn changed_keys(&self, other: &Config) -> Vec<SettingKey> {
        let mut changed = Vec::new();
        let (old, new) = (self, other);
        macro_rules! diff {
            ($($field:ident => $key:ident),* $(,)?) => {
                $(if old.$field != new.$field {
                    changed.push(SettingKey::$key);
                })*
            };
        }
        diff!(
            interval_secs => Interval,
            decimals => Decimals,
            source_timeout_ms => SourceTimeout,
            cpu => Cpu,
            cpu_frequency => CpuFrequency,
            load_average => LoadAverage,
            ram => Ram,
            swap => Swap,
            disk_stats => DiskStats,
            disk_stats_mode => DiskStatsMode,
            disk_space => DiskSpace,
            net_eth => NetEth,
            net_wlan => NetWlan,
            thermal => Thermal,
            gpu => Gpu,
            memory_display => MemoryDisplay,
            disk_space_display => DiskSpaceDisplay,
            net_unit => NetUnit,
            net_base => NetBase,
            thermal_unit => ThermalUnit,
            frequency_unit => FrequencyUnit,
            net_auto_hide => NetAutoHide,
            net_eth_always_show => NetEthAlwaysShow,
            net_wlan_always_show => NetWlanAlwaysShow,
            disk_devices => DiskDevices,
            thermal_sensors => ThermalSensors,
            gpu_devices => GpuDevices,
            sources => Sources,
        );
        changed
    }
}

/// Identity of a single changed setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Interval,
    Decimals,
    SourceTimeout,
    Cpu,
    CpuFrequency,
    LoadAverage,
    Ram,
    Swap,
    DiskStats,
    DiskStatsMode,
    DiskSpace,
    NetEth,
    NetWlan,
    Thermal,
    Gpu,
    MemoryDisplay,
    DiskSpaceDisplay,
    NetUnit,
    NetBase,
    ThermalUnit,
    FrequencyUnit,
    NetAutoHide,
    NetEthAlwaysShow,
    NetWlanAlwaysShow,
    DiskDevices,
    ThermalSensors,
    GpuDevices,
    Sources,
}

impl SettingKey {
    pub fn is_device_list(self) -> bool {
        matches!(
            self,
            SettingKey::DiskDevices | SettingKey::ThermalSensors | SettingKey::GpuDevices
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskEntry {
    pub device: String,
    pub stats: bool,
    pub space: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorEntry {
    pub label: String,
    pub path: PathBuf,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuEntry {
    pub uuid: String,
    pub name: String,
    pub usage: bool,
    pub memory: bool,
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn split_entry(raw: &str, fields: usize) -> Option<Vec<&str>> {
    let parts: Vec<&str> = raw.split(DEVICE_SEPARATOR).collect();
    if parts.len() != fields || parts[0].trim().is_empty() {
        return None;
    }
    Some(parts)
}

impl DiskEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts = split_entry(raw, 3)?;
        Some(Self {
            device: parts[0].trim().to_string(),
            stats: parse_flag(parts[1])?,
            space: parse_flag(parts[2])?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.device, self.stats, self.space)
    }
}

impl SensorEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts = split_entry(raw, 3)?;
        let path = parts[1].trim();
        if path.is_empty() {
            return None;
        }
        Some(Self {
            label: parts[0].trim().to_string(),
            path: PathBuf::from(path),
            enabled: parse_flag(parts[2])?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.label, self.path.display(), self.enabled)
    }
}

impl GpuEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts = split_entry(raw, 4)?;
        Some(Self {
            uuid: parts[0].trim().to_string(),
            name: parts[1].trim().to_string(),
            usage: parse_flag(parts[2])?,
            memory: parse_flag(parts[3])?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}|{}|{}|{}", self.uuid, self.name, self.usage, self.memory)
    }
}

/// Parsed device lists. Each list is rebuilt only when its raw setting
/// differs from the one it was parsed from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceLists {
    pub disks: Vec<DiskEntry>,
    pub sensors: Vec<SensorEntry>,
    pub gpus: Vec<GpuEntry>,
    raw_disks: Vec<String>,
    raw_sensors: Vec<String>,
    raw_gpus: Vec<String>,
}

impl DeviceLists {
    pub fn from_config(config: &Config) -> Self {
        let mut lists = Self::default();
        lists.sync(config);
        lists
    }

    pub fn refresh(&mut self, key: SettingKey, config: &Config) {
        match key {
            SettingKey::DiskDevices => {
                self.disks = parse_list(&config.disk_devices, DiskEntry::parse, "disk");
                self.raw_disks = config.disk_devices.clone();
            }
            SettingKey::ThermalSensors => {
                self.sensors = parse_list(&config.thermal_sensors, SensorEntry::parse, "sensor");
                self.raw_sensors = config.thermal_sensors.clone();
            }
            SettingKey::GpuDevices => {
                self.gpus = parse_list(&config.gpu_devices, GpuEntry::parse, "gpu");
                self.raw_gpus = config.gpu_devices.clone();
            }
            _ => {}
        }
    }

    /// Re-parses every list whose raw setting no longer matches `config`,
    /// returning the keys that were rebuilt.
    pub fn sync(&mut self, config: &Config) -> Vec<SettingKey> {
        let mut stale = Vec::new();
        if self.raw_disks != config.disk_devices {
            stale.push(SettingKey::DiskDevices);
        }
        if self.raw_sensors != config.thermal_sensors {
            stale.push(SettingKey::ThermalSensors);
        }
        if self.raw_gpus != config.gpu_devices {
            stale.push(SettingKey::GpuDevices);
        }
        for key in &stale {
            self.refresh(*key, config);
        }
        stale
    }

    pub fn sensor(&self, label: &str) -> Option<&SensorEntry> {
        self.sensors.iter().find(|s| s.label == label)
    }
}

fn parse_list<T>(raw: &[String], parse: fn(&str) -> Option<T>, what: &str) -> Vec<T> {
    raw.iter()
        .filter_map(|entry| {
            let parsed = parse(entry);
            if parsed.is_none() {
                warn!("skipping malformed {} entry {:?}", what, entry);
            }
            parsed
        })
        .collect()
}
