use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use propserver_rs::host::UdpClient;
use propserver_rs::{config, Receiver};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Drives networked props from E1.31 lighting console data.
#[derive(Parser, Debug)]
#[command(name = "propserver")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config_root = config::read_config_yaml(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let client = UdpClient::new(&config_root.dispatch.bind_addr, config_root.dispatch.port)
        .with_context(|| format!("Unable to bind {}", config_root.dispatch.bind_addr))?;
    let client = Arc::new(client);

    let receiver = Receiver::new(config_root.receiver.clone(), client.clone());
    for spec in config_root.fixtures {
        receiver.add_fixture(spec);
    }

    let conflicts = receiver.find_conflicts();
    if !conflicts.is_empty() {
        warn!("{} DMX address conflicts; reassign addressing", conflicts.len());
    }

    receiver.start()?;

    loop {
        thread::sleep(STATUS_INTERVAL);
        let status = receiver.status();
        info!(
            "Status: {}/{} props online, {} universes, {} conflicts, {} received, {} processed ({:.1}%), {} commands sent",
            status.fixtures_online,
            status.fixtures.len(),
            status.universes_seen.len(),
            status.address_conflicts,
            status.packets_received,
            status.packets_processed,
            status.processing_efficiency,
            client.sent_count(),
        );
    }
}
