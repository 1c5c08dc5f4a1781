use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use wirelog::config::Config;
use wirelog::core::{Event, EventKind};
use wirelog::engine::Monitor;

#[derive(Parser)]
#[command(name = "wirelog")]
#[command(author, version, about = "Passive DNS, HTTP and mail traffic logger")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Capture on this network interface
    #[arg(short, long, conflicts_with = "read")]
    pub interface: Option<String>,

    /// Replay a pcap file instead of capturing
    #[arg(short, long)]
    pub read: Option<PathBuf>,

    /// Event kinds to print (default: all)
    #[arg(short, long, value_delimiter = ',')]
    pub events: Vec<EventKind>,

    /// GeoLite2 country database, overrides the config file
    #[arg(long)]
    pub geoip: Option<PathBuf>,

    /// BPF filter applied to the capture, overrides the config file
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(db) = cli.geoip {
        config.geoip.database = Some(db);
    }
    if let Some(filter) = cli.filter {
        config.capture.filter = Some(filter);
    }

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
        return Ok(());
    }

    let kinds = if cli.events.is_empty() {
        EventKind::ALL.to_vec()
    } else {
        cli.events
    };

    let interface = cli.interface.or_else(|| config.capture.interface.clone());
    let mut monitor = Monitor::new(config)?;
    for kind in kinds {
        monitor.subscribe(kind, print_event);
    }

    match (&cli.read, &interface) {
        (Some(path), _) => monitor.start_offline(path)?,
        (None, Some(iface)) => monitor.start(iface)?,
        (None, None) => bail!("No interface given; use --interface or set capture.interface"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if !monitor.is_running() {
                    break;
                }
            }
        }
    }

    monitor.stop();
    let stats = monitor.stats();
    info!(
        "Processed {} packets, delivered {} events",
        stats.packets_captured, stats.events_delivered
    );
    Ok(())
}

/// One JSON object per line on stdout, stamped with the delivery time
fn print_event(event: &Event) {
    match event_line(event, Utc::now()) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            if writeln!(out, "{}", line).is_err() {
                warn!("stdout closed, dropping event");
            }
        }
        Err(e) => warn!("Failed to serialize {} event: {}", event.kind(), e),
    }
}

fn event_line(event: &Event, at: DateTime<Utc>) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("ts".to_string(), serde_json::Value::String(at.to_rfc3339()));
    }
    serde_json::to_string(&value)
}
