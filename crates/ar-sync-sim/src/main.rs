//! ar-sync-sim: runs several simulated AR devices through a scripted shared
//! session and reports what each device ends up with.

use anyhow::Result;
use ar_sync_sim::scenario::{self, Observer};
use ar_sync_sim::SimConfig;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ar-sync-sim")]
#[command(about = "Simulate a multiuser AR session over a loopback network")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of devices (overrides the config file)
    #[arg(short, long)]
    devices: Option<usize>,

    /// Effects placed by the first device (overrides the config file)
    #[arg(short, long)]
    taps: Option<usize>,

    /// Best-effort loss rate between 0 and 1 (overrides the config file)
    #[arg(long)]
    loss: Option<f64>,

    /// Print session events as JSON lines
    #[arg(long)]
    events: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,ar_sync_sim=debug"
    } else {
        "info,ar_sync_sim=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            SimConfig::load(path)?
        }
        None => SimConfig::default(),
    };
    if let Some(devices) = args.devices {
        config.devices = devices;
    }
    if let Some(taps) = args.taps {
        config.taps = taps;
    }
    if let Some(loss) = args.loss {
        config.loss_rate = loss;
    }
    config.validate()?;

    if config.devices > config.sync.max_peers + 1 {
        warn!(
            "{} devices exceed the session capacity of {} peers, expect rejections",
            config.devices, config.sync.max_peers
        );
    }

    let observer: Option<Observer> = args.events.then(|| {
        Arc::new(|device: &str, event: &ar_sync_core::SessionEvent| {
            match serde_json::to_string(event) {
                Ok(json) => println!("{{\"device\":\"{}\",\"event\":{}}}", device, json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }) as Observer
    });

    info!(
        "Starting {} device(s), {} tap(s), loss rate {}",
        config.devices, config.taps, config.loss_rate
    );
    let report = scenario::run(&config, observer).await?;

    for device in &report.devices {
        info!(
            "{} ({}): {} peer session(s), {} anchor(s), {} visual(s)",
            device.name, device.peer, device.known_sessions, device.anchors, device.visuals
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Done");
    Ok(())
}
