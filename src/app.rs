use crate::config::{Config, SettingKey};
use crate::engine::Engine;
use crate::model::MetricFrame;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};

/// A single setting change pushed by the settings collaborator, along with
/// the configuration as it stands after the change.
#[derive(Clone, Debug)]
pub struct SettingsChange {
    pub key: SettingKey,
    pub config: Config,
}

fn ticker(period: Duration, immediate: bool) -> Interval {
    let mut ticker = if immediate {
        interval(period)
    } else {
        interval_at(Instant::now() + period, period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct App {
    config: Config,
    engine: Engine,
}

impl App {
    pub fn new(config: Config) -> Self {
        let engine = Engine::new(&config);
        Self { config, engine }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn tick(&mut self) -> MetricFrame {
        self.engine.tick(&self.config).await
    }

    /// Applies one change. Returns true when the timer must be rescheduled.
    pub fn apply(&mut self, change: SettingsChange) -> bool {
        let reschedule =
            change.key == SettingKey::Interval && change.config.interval() != self.config.interval();
        self.config = change.config;
        self.engine.apply_setting(change.key, &self.config);
        reschedule
    }

    /// Drives the engine on one timer until the frame receiver goes away.
    /// Ticks never overlap: a tick runs to completion before the next timer
    /// event or settings change is looked at.
    pub async fn run(
        mut self,
        mut settings: mpsc::Receiver<SettingsChange>,
        frames: mpsc::Sender<MetricFrame>,
    ) {
        let mut timer = ticker(self.config.interval(), true);
        let mut settings_open = true;
        info!("sampling every {:?}", self.config.interval());

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let frame = self.tick().await;
                    if frames.send(frame).await.is_err() {
                        debug!("frame receiver dropped, stopping");
                        return;
                    }
                }
                change = settings.recv(), if settings_open => match change {
                    Some(change) => {
                        debug!("setting changed: {:?}", change.key);
                        if self.apply(change) {
                            info!("sampling every {:?}", self.config.interval());
                            timer = ticker(self.config.interval(), false);
                        }
                    }
                    None => settings_open = false,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKey;
    use std::fs;
    use tempfile::tempdir;

    fn config_in(root: &std::path::Path) -> Config {
        let mut config = Config {
            ram: false,
            disk_stats: false,
            net_eth: false,
            net_wlan: false,
            ..Config::default()
        };
        config.sources.proc_root = root.to_path_buf();
        config.sources.sys_root = root.to_path_buf();
        config
    }

    #[test]
    fn interval_change_requests_reschedule() {
        let tmp = tempdir().unwrap();
        let mut app = App::new(config_in(tmp.path()));
        let same = app.config().clone();
        assert!(!app.apply(SettingsChange {
            key: SettingKey::Interval,
            config: same,
        }));

        let faster = Config {
            interval_secs: 7,
            ..app.config().clone()
        };
        assert!(app.apply(SettingsChange {
            key: SettingKey::Interval,
            config: faster,
        }));
        assert_eq!(app.config().interval_secs, 7);
    }

    #[tokio::test]
    async fn run_publishes_frames_and_stops_when_receiver_drops() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("stat"), "cpu  1 0 1 8 0 0 0 0 0 0\n").unwrap();
        let config = Config {
            interval_secs: 1,
            ..config_in(tmp.path())
        };

        let (settings_tx, settings_rx) = mpsc::channel(4);
        let (frames_tx, mut frames_rx) = mpsc::channel(4);
        let handle = tokio::spawn(App::new(config.clone()).run(settings_rx, frames_tx));

        let first = frames_rx.recv().await.unwrap();
        assert_eq!(first.get(&MetricKey::Cpu).unwrap().value, "--");

        let disabled = Config {
            cpu: false,
            ..config
        };
        settings_tx
            .send(SettingsChange {
                key: SettingKey::Cpu,
                config: disabled,
            })
            .await
            .unwrap();
        let next = frames_rx.recv().await.unwrap();
        assert!(next.get(&MetricKey::Cpu).is_none());

        drop(frames_rx);
        drop(settings_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
