use crate::config::{AmountDisplay, Config, DeviceLists, FrequencyUnit, NetUnit, SettingKey, ThermalUnit};
use crate::model::{
    CounterSample, DiskTarget, FormattedMetric, LinkKind, MetricFrame, MetricKey,
};
use crate::monitor::cpu::{self, CpuTimes};
use crate::monitor::disk::{self, DiskIo, DiskSpace, SECTOR_BYTES};
use crate::monitor::gpu::{self, GpuStats};
use crate::monitor::memory::{self, MemInfo};
use crate::monitor::network::{self, InterfaceCounters};
use crate::monitor::temperature;
use crate::rate::{self, RateOutcome};
use crate::store::SampleStore;
use crate::units::{self, Scaled};
use crate::{Error, Result};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::time::Instant;
use tokio::task::JoinSet;

/// Raw source data gathered for one tick. `None` means the source was not
/// needed by any enabled key.
struct Readings {
    stat: Option<Result<CpuTimes>>,
    frequency_mhz: Option<Result<f64>>,
    load_average: Option<Result<f64>>,
    meminfo: Option<Result<MemInfo>>,
    diskstats: Option<Result<Vec<DiskIo>>>,
    whole_disks: Option<BTreeSet<String>>,
    df: Option<Result<Vec<DiskSpace>>>,
    net: Option<Result<Vec<InterfaceCounters>>>,
    links: BTreeMap<LinkKind, bool>,
    sensors: BTreeMap<String, Result<f64>>,
    gpus: Option<Result<Vec<GpuStats>>>,
}

async fn when<T, F>(needed: bool, read: F) -> Option<T>
where
    F: Future<Output = T>,
{
    if needed {
        Some(read.await)
    } else {
        None
    }
}

/// Borrows a shared reading for one key, turning a failed read into an
/// owned error for that key alone.
fn shared<'a, T>(reading: &'a Option<Result<T>>, what: &str) -> Result<&'a T> {
    match reading {
        Some(Ok(value)) => Ok(value),
        Some(Err(Error::Parse(m))) => Err(Error::Parse(m.clone())),
        Some(Err(Error::Timeout(ms))) => Err(Error::Timeout(*ms)),
        Some(Err(e)) => Err(Error::Unavailable(format!("{}: {}", what, e))),
        None => Err(Error::Unavailable(format!("{} was not read", what))),
    }
}

/// Metric registry: resolves the enabled keys each tick, gathers their
/// sources concurrently and folds the results into the sample store.
pub struct Engine {
    devices: DeviceLists,
    store: SampleStore,
    failing: HashSet<MetricKey>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Self {
            devices: DeviceLists::from_config(config),
            store: SampleStore::new(),
            failing: HashSet::new(),
        }
    }

    pub fn devices(&self) -> &DeviceLists {
        &self.devices
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Reacts to one changed setting. Device lists are only re-parsed when
    /// their own setting changed; disabled streams lose their baseline now
    /// rather than on the next tick.
    pub fn apply_setting(&mut self, key: SettingKey, config: &Config) {
        if key.is_device_list() {
            self.devices.refresh(key, config);
        }
        let active = config.enabled_keys(&self.devices);
        self.evict_inactive(&active);
    }

    fn evict_inactive(&mut self, active: &BTreeSet<MetricKey>) {
        for key in self.store.evict_all_except(active) {
            debug!("{}: evicted", key);
        }
        self.failing.retain(|k| active.contains(k));
    }

    pub async fn tick(&mut self, config: &Config) -> MetricFrame {
        self.tick_at(config, Instant::now()).await
    }

    /// Runs one tick with every sample stamped `now`.
    pub async fn tick_at(&mut self, config: &Config, now: Instant) -> MetricFrame {
        for key in self.devices.sync(config) {
            debug!("{:?} rebuilt from tick snapshot", key);
        }
        let keys = config.enabled_keys(&self.devices);
        self.evict_inactive(&keys);

        let started = Instant::now();
        let readings = self.gather(config, &keys).await;
        trace!("{} sources gathered in {:?}", keys.len(), started.elapsed());

        let mut frame = MetricFrame::default();
        for key in &keys {
            let metric = match self.compute(key, config, &readings, now) {
                Ok(metric) => {
                    if self.failing.remove(key) {
                        info!("{}: source recovered", key);
                    }
                    metric
                }
                Err(e) => {
                    if self.failing.insert(key.clone()) {
                        warn!("{}: {}", key, e);
                    }
                    FormattedMetric::error(key.clone())
                }
            };
            frame.insert(self.with_visibility(metric, config, &readings));
        }
        frame
    }

    async fn gather(&self, config: &Config, keys: &BTreeSet<MetricKey>) -> Readings {
        let sources = &config.sources;
        let timeout = config.source_timeout();
        let has = |pred: fn(&MetricKey) -> bool| keys.iter().any(pred);

        let need_stat = keys.contains(&MetricKey::Cpu);
        let need_freq = keys.contains(&MetricKey::CpuFrequency);
        let need_load = keys.contains(&MetricKey::LoadAverage);
        let need_mem = keys.contains(&MetricKey::Ram) || keys.contains(&MetricKey::Swap);
        let need_io = has(|k| matches!(k, MetricKey::DiskStats(_)));
        let need_whole = keys.contains(&MetricKey::DiskStats(DiskTarget::All));
        let need_df = has(|k| matches!(k, MetricKey::DiskSpace(_)));
        let need_net = has(|k| k.link().is_some());
        let need_gpu = has(|k| matches!(k, MetricKey::GpuUsage(_) | MetricKey::GpuMemory(_)));

        let mut sensor_reads = JoinSet::new();
        for key in keys {
            if let MetricKey::CpuTemperature(label) = key {
                if let Some(sensor) = self.devices.sensor(label) {
                    let label = label.clone();
                    let path = sensor.path.clone();
                    sensor_reads.spawn(async move {
                        (label, temperature::read_celsius(&path, timeout).await)
                    });
                }
            }
        }

        let link_kinds: Vec<LinkKind> = if config.net_auto_hide {
            keys.iter().filter_map(MetricKey::link).collect()
        } else {
            Vec::new()
        };

        let (stat, frequency_mhz, load_average, meminfo, diskstats, whole_disks, df, net, gpus) = tokio::join!(
            when(need_stat, cpu::read(&sources.proc_root, timeout)),
            when(need_freq, cpu::read_frequency_mhz(&sources.sys_root, timeout)),
            when(need_load, cpu::read_load_average(&sources.proc_root, timeout)),
            when(need_mem, memory::read(&sources.proc_root, timeout)),
            when(need_io, disk::read_io(&sources.proc_root, timeout)),
            when(need_whole, disk::whole_disks(&sources.sys_root)),
            when(need_df, disk::read_space(&sources.df_command, timeout)),
            when(need_net, async {
                let interfaces = network::read(&sources.proc_root, timeout).await;
                let mut links = BTreeMap::new();
                if let Ok(list) = &interfaces {
                    for kind in &link_kinds {
                        let up = network::link_active(&sources.sys_root, list, *kind, timeout).await;
                        links.insert(*kind, up);
                    }
                }
                (interfaces, links)
            }),
            when(need_gpu, gpu::query(&sources.gpu_command, timeout)),
        );

        let mut sensors = BTreeMap::new();
        while let Some(joined) = sensor_reads.join_next().await {
            match joined {
                Ok((label, reading)) => {
                    sensors.insert(label, reading);
                }
                Err(e) => warn!("sensor read task failed: {}", e),
            }
        }

        let (net, links) = match net {
            Some((interfaces, links)) => (Some(interfaces), links),
            None => (None, BTreeMap::new()),
        };

        Readings {
            stat,
            frequency_mhz,
            load_average,
            meminfo,
            diskstats,
            whole_disks: whole_disks.flatten(),
            df,
            net,
            links,
            sensors,
            gpus,
        }
    }

    fn with_visibility(
        &self,
        mut metric: FormattedMetric,
        config: &Config,
        readings: &Readings,
    ) -> FormattedMetric {
        if let Some(kind) = metric.key.link() {
            let forced = match kind {
                LinkKind::Eth => config.net_eth_always_show,
                LinkKind::Wlan => config.net_wlan_always_show,
            };
            if config.net_auto_hide && !forced {
                metric.visible = readings.links.get(&kind).copied().unwrap_or(false);
            }
        }
        metric
    }

    fn compute(
        &mut self,
        key: &MetricKey,
        config: &Config,
        readings: &Readings,
        now: Instant,
    ) -> Result<FormattedMetric> {
        let places = config.decimal_places();
        let metric = match key {
            MetricKey::Cpu => {
                let times = shared(&readings.stat, "cpu")?;
                let sample = CounterSample::new(times.counters(), now);
                match rate::cpu_percent(&mut self.store, key, sample).values() {
                    Some(v) => FormattedMetric::new(key.clone(), units::format_number(v[0], places), "%"),
                    None => FormattedMetric::no_data(key.clone()),
                }
            }
            MetricKey::CpuFrequency => {
                let mhz = *shared(&readings.frequency_mhz, "cpu frequency")?;
                match config.frequency_unit {
                    FrequencyUnit::Mhz => {
                        FormattedMetric::new(key.clone(), units::format_number(mhz, places), "MHz")
                    }
                    FrequencyUnit::Ghz => {
                        FormattedMetric::new(key.clone(), units::format_number(mhz / 1000.0, places), "GHz")
                    }
                }
            }
            MetricKey::LoadAverage => {
                let load = *shared(&readings.load_average, "load average")?;
                FormattedMetric::new(key.clone(), units::format_number(load, places), "")
            }
            MetricKey::Ram => {
                let info = shared(&readings.meminfo, "meminfo")?;
                amount(
                    key,
                    config.memory_display,
                    info.ram_used_percent(),
                    info.ram_used(),
                    info.mem_available,
                    units::SIZE_UNITS,
                    places,
                )
            }
            MetricKey::Swap => {
                let info = shared(&readings.meminfo, "meminfo")?;
                amount(
                    key,
                    config.memory_display,
                    info.swap_used_percent(),
                    info.swap_used(),
                    info.swap_free,
                    units::SIZE_UNITS,
                    places,
                )
            }
            MetricKey::DiskStats(target) => {
                let disks = shared(&readings.diskstats, "diskstats")?;
                let counters = match target {
                    DiskTarget::All => disk::aggregate(disks, readings.whole_disks.as_ref()),
                    DiskTarget::Device(name) => disk::find_io(disks, name)
                        .ok_or_else(|| Error::Unavailable(format!("no diskstats line for {}", name)))?
                        .counters(),
                };
                let sample = CounterSample::new(counters, now);
                let outcome = rate::per_second(&mut self.store, key, sample);
                io_pair(key, &outcome, places, |sectors| {
                    units::scale(sectors * SECTOR_BYTES as f64 / 1024.0, 1024.0, units::DISK_IO_UNITS)
                })
            }
            MetricKey::DiskSpace(device) => {
                let rows = shared(&readings.df, "df")?;
                let row = disk::find_space(rows, device)
                    .ok_or_else(|| Error::Unavailable(format!("{} not mounted", device)))?;
                let used_percent = match (config.disk_space_display, row.used_percent) {
                    (AmountDisplay::Percent, None) => {
                        return Err(Error::Parse(format!("df: no capacity for {}", device)))
                    }
                    (_, percent) => percent.unwrap_or_default(),
                };
                amount(
                    key,
                    config.disk_space_display,
                    used_percent,
                    row.used_kb,
                    row.available_kb,
                    units::SIZE_UNITS,
                    places,
                )
            }
            MetricKey::NetEth | MetricKey::NetWlan => {
                let interfaces = shared(&readings.net, "net/dev")?;
                let kind = key.link().unwrap_or(LinkKind::Eth);
                let sample = CounterSample::new(network::totals(interfaces, kind)?, now);
                let outcome = rate::per_second(&mut self.store, key, sample);
                let base = config.net_base.value();
                let (factor, ladder) = match config.net_unit {
                    NetUnit::Bytes => (1.0, units::BYTE_RATE_UNITS),
                    NetUnit::Bits => (8.0, units::BIT_RATE_UNITS),
                };
                io_pair(key, &outcome, places, |bytes| units::scale(bytes * factor, base, ladder))
            }
            MetricKey::CpuTemperature(label) => {
                let celsius = match readings.sensors.get(label) {
                    Some(Ok(c)) => *c,
                    Some(Err(e)) => return Err(Error::Unavailable(format!("sensor {}: {}", label, e))),
                    None => return Err(Error::Unavailable(format!("sensor {} not configured", label))),
                };
                match config.thermal_unit {
                    ThermalUnit::Celsius => {
                        FormattedMetric::new(key.clone(), units::format_number(celsius, places), "°C")
                    }
                    ThermalUnit::Fahrenheit => FormattedMetric::new(
                        key.clone(),
                        units::format_number(units::celsius_to_fahrenheit(celsius), places),
                        "°F",
                    ),
                }
            }
            MetricKey::GpuUsage(uuid) => {
                let gpu = find_gpu(shared(&readings.gpus, "gpu query")?, uuid)?;
                let usage = gpu
                    .usage_percent
                    .ok_or_else(|| Error::Unavailable(format!("{} reports no utilization", uuid)))?;
                FormattedMetric::new(key.clone(), units::format_number(usage, places), "%")
            }
            MetricKey::GpuMemory(uuid) => {
                let gpu = find_gpu(shared(&readings.gpus, "gpu query")?, uuid)?;
                amount(
                    key,
                    config.memory_display,
                    gpu.memory_used_percent(),
                    gpu.memory_used_mib,
                    gpu.memory_free_mib,
                    units::MIB_UNITS,
                    places,
                )
            }
        };
        Ok(metric)
    }
}

fn find_gpu<'a>(gpus: &'a [GpuStats], uuid: &str) -> Result<&'a GpuStats> {
    gpus.iter()
        .find(|g| g.uuid == uuid)
        .ok_or_else(|| Error::Unavailable(format!("gpu {} not reported", uuid)))
}

fn amount(
    key: &MetricKey,
    display: AmountDisplay,
    used_percent: f64,
    used: u64,
    free: u64,
    ladder: &'static [&'static str],
    places: usize,
) -> FormattedMetric {
    let scaled = |v: u64| units::scale(v as f64, 1024.0, ladder);
    let (value, unit) = match display {
        AmountDisplay::Percent => (units::format_number(used_percent, places), "%"),
        AmountDisplay::Used => {
            let s = scaled(used);
            (units::format_number(s.value, places), s.unit)
        }
        AmountDisplay::Free => {
            let s = scaled(free);
            (units::format_number(s.value, places), s.unit)
        }
    };
    FormattedMetric::new(key.clone(), value, unit)
}

fn io_pair(
    key: &MetricKey,
    outcome: &RateOutcome,
    places: usize,
    scale: impl Fn(f64) -> Scaled,
) -> FormattedMetric {
    match outcome.values() {
        Some([first, second]) => FormattedMetric::new(
            key.clone(),
            units::format_pair(scale(*first), scale(*second), places),
            "/s",
        ),
        _ => FormattedMetric::no_data(key.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn fixture() -> (TempDir, Config) {
        let tmp = tempdir().unwrap();
        let proc_root = tmp.path().join("proc");
        let sys_root = tmp.path().join("sys");
        fs::create_dir_all(proc_root.join("net")).unwrap();
        fs::create_dir_all(&sys_root).unwrap();
        let mut config = Config {
            ram: false,
            disk_stats: false,
            net_eth: false,
            net_wlan: false,
            ..Config::default()
        };
        config.sources.proc_root = proc_root;
        config.sources.sys_root = sys_root;
        (tmp, config)
    }

    fn write_stat(config: &Config, user: u64, system: u64, idle: u64) {
        fs::write(
            config.sources.proc_root.join("stat"),
            format!("cpu  {user} 0 {system} {idle} 0 0 0 0 0 0\n"),
        )
        .unwrap();
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn cpu_goes_from_placeholder_to_percentage() {
        let (_tmp, config) = fixture();
        let mut engine = Engine::new(&config);
        let t0 = Instant::now();

        write_stat(&config, 100, 50, 850);
        let frame = engine.tick_at(&config, t0).await;
        assert_eq!(frame.get(&MetricKey::Cpu).unwrap().value, "--");

        write_stat(&config, 110, 55, 935);
        let frame = engine.tick_at(&config, at(t0, 1000)).await;
        let cpu = frame.get(&MetricKey::Cpu).unwrap();
        assert_eq!(cpu.value, "15");
        assert_eq!(cpu.unit, "%");
    }

    #[tokio::test]
    async fn missing_source_only_affects_its_key() {
        let (_tmp, config) = fixture();
        let config = Config { ram: true, ..config };
        write_stat(&config, 1, 1, 1);
        let mut engine = Engine::new(&config);

        let frame = engine.tick(&config).await;
        assert_eq!(frame.get(&MetricKey::Ram).unwrap().value, "Error");
        assert_eq!(frame.get(&MetricKey::Cpu).unwrap().value, "--");
    }

    #[tokio::test]
    async fn disabling_evicts_and_reenabling_rebaselines() {
        let (_tmp, config) = fixture();
        let mut engine = Engine::new(&config);
        let t0 = Instant::now();
        write_stat(&config, 100, 50, 850);
        engine.tick_at(&config, t0).await;
        assert!(engine.store().contains(&MetricKey::Cpu));

        let disabled = Config { cpu: false, ..config.clone() };
        engine.apply_setting(SettingKey::Cpu, &disabled);
        assert!(!engine.store().contains(&MetricKey::Cpu));
        assert!(engine.tick_at(&disabled, at(t0, 1000)).await.is_empty());

        write_stat(&config, 500, 200, 5000);
        let frame = engine.tick_at(&config, at(t0, 60_000)).await;
        assert_eq!(frame.get(&MetricKey::Cpu).unwrap().value, "--");
    }

    #[tokio::test]
    async fn overflowing_stat_reports_error_without_panicking() {
        let (_tmp, config) = fixture();
        let mut engine = Engine::new(&config);
        fs::write(
            config.sources.proc_root.join("stat"),
            "cpu  18446744073709551615 1 0 0 0 0 0 0 0 0\n",
        )
        .unwrap();
        let frame = engine.tick(&config).await;
        assert_eq!(frame.get(&MetricKey::Cpu).unwrap().value, "Error");
        assert!(!engine.store().contains(&MetricKey::Cpu));
    }

    #[tokio::test]
    async fn frequency_and_load_follow_decimals_setting() {
        let (_tmp, config) = fixture();
        let freq_dir = config.sources.sys_root.join("devices/system/cpu/cpu0/cpufreq");
        fs::create_dir_all(&freq_dir).unwrap();
        fs::write(freq_dir.join("scaling_cur_freq"), "2456000\n").unwrap();
        fs::write(
            config.sources.proc_root.join("loadavg"),
            "1.37 0.90 0.41 2/611 4242\n",
        )
        .unwrap();
        let config = Config {
            cpu: false,
            cpu_frequency: true,
            load_average: true,
            frequency_unit: FrequencyUnit::Ghz,
            ..config
        };
        let mut engine = Engine::new(&config);

        let frame = engine.tick(&config).await;
        let freq = frame.get(&MetricKey::CpuFrequency).unwrap();
        assert_eq!((freq.value.as_str(), freq.unit.as_str()), ("2", "GHz"));
        assert_eq!(frame.get(&MetricKey::LoadAverage).unwrap().value, "1");

        let config = Config { decimals: true, ..config };
        let frame = engine.tick(&config).await;
        assert_eq!(frame.get(&MetricKey::CpuFrequency).unwrap().value, "2.5");
        assert_eq!(frame.get(&MetricKey::LoadAverage).unwrap().value, "1.4");
    }

    fn write_sensor(dir: &Path, milli: &str) -> String {
        let path = dir.join("temp1_input");
        fs::write(&path, milli).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn formats_temperature_in_configured_unit() {
        let (tmp, config) = fixture();
        let path = write_sensor(tmp.path(), "50000\n");
        let config = Config {
            cpu: false,
            thermal: true,
            thermal_unit: ThermalUnit::Fahrenheit,
            thermal_sensors: vec![format!("Package|{path}|true")],
            ..config
        };
        let mut engine = Engine::new(&config);
        let frame = engine.tick(&config).await;
        let temp = frame.get(&MetricKey::CpuTemperature("Package".into())).unwrap();
        assert_eq!(temp.value, "122");
        assert_eq!(temp.unit, "°F");
    }

    #[tokio::test]
    async fn device_list_change_is_picked_up_through_its_key() {
        let (tmp, config) = fixture();
        let path = write_sensor(tmp.path(), "40000\n");
        let config = Config {
            cpu: false,
            thermal: true,
            ..config
        };
        let mut engine = Engine::new(&config);
        assert!(engine.tick(&config).await.is_empty());

        let updated = Config {
            thermal_sensors: vec![format!("Core|{path}|true")],
            ..config
        };
        engine.apply_setting(SettingKey::Decimals, &updated);
        assert!(engine.devices().sensors.is_empty());

        engine.apply_setting(SettingKey::ThermalSensors, &updated);
        assert_eq!(engine.devices().sensors.len(), 1);
        let frame = engine.tick(&updated).await;
        assert_eq!(frame.get(&MetricKey::CpuTemperature("Core".into())).unwrap().value, "40");
    }

    #[tokio::test]
    async fn tick_follows_device_lists_of_its_snapshot() {
        let (tmp, config) = fixture();
        let path = write_sensor(tmp.path(), "40000\n");
        let config = Config {
            cpu: false,
            thermal: true,
            ..config
        };
        let mut engine = Engine::new(&config);
        assert!(engine.tick(&config).await.is_empty());

        // no notification: the snapshot alone carries the new list
        let updated = Config {
            thermal_sensors: vec![format!("Core|{path}|true")],
            ..config.clone()
        };
        let frame = engine.tick(&updated).await;
        assert_eq!(frame.get(&MetricKey::CpuTemperature("Core".into())).unwrap().value, "40");

        let frame = engine.tick(&config).await;
        assert!(frame.is_empty());
        assert!(engine.devices().sensors.is_empty());
    }
}
