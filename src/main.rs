use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use resource_monitor::app::{App, SettingsChange};
use resource_monitor::config::{config_path, Config};
use resource_monitor::model::MetricFrame;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "resource-monitor", about = "Samples system counters for a status bar")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the sampling interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Print frames as JSON lines
    #[arg(long)]
    json: bool,

    /// Take two samples one interval apart, print the second and exit
    #[arg(long)]
    once: bool,
}

fn load(path: &Path, interval: Option<u64>) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        Config::load_from(path).with_context(|| format!("reading {}", path.display()))?
    } else {
        Config::default()
    };
    if let Some(secs) = interval {
        config.interval_secs = secs;
    }
    Ok(config)
}

fn render(frame: &MetricFrame, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(frame)?);
    }
    let line = frame
        .visible()
        .map(|m| format!("{} {}{}", m.key, m.value, m.unit))
        .collect::<Vec<_>>()
        .join("  ");
    Ok(line)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config_path);
    let config = load(&path, cli.interval)?;

    if cli.once {
        let mut app = App::new(config);
        app.tick().await;
        tokio::time::sleep(app.config().interval()).await;
        let frame = app.tick().await;
        println!("{}", render(&frame, cli.json)?);
        return Ok(());
    }

    let (settings_tx, settings_rx) = mpsc::channel(16);
    let (frames_tx, mut frames_rx) = mpsc::channel(4);
    tokio::spawn(App::new(config.clone()).run(settings_rx, frames_tx));

    // SIGHUP re-reads the config file; each differing field becomes one change.
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let interval = cli.interval;
    tokio::spawn(async move {
        let mut current = config;
        while hangup.recv().await.is_some() {
            let reloaded = match load(&path, interval) {
                Ok(reloaded) => reloaded,
                Err(e) => {
                    warn!("keeping previous config: {:#}", e);
                    continue;
                }
            };
            for key in current.changed_keys(&reloaded) {
                let change = SettingsChange {
                    key,
                    config: reloaded.clone(),
                };
                if settings_tx.send(change).await.is_err() {
                    return;
                }
            }
            current = reloaded;
            info!("config reloaded from {}", path.display());
        }
    });

    loop {
        tokio::select! {
            frame = frames_rx.recv() => match frame {
                Some(frame) => println!("{}", render(&frame, cli.json)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
