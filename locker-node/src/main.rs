//! Locker Node - CLI for the MQTT locker simulator
//!
//! Runs one simulated smart locker: persists its boxes, answers box-data
//! requests and unlock commands, and publishes periodic status.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (public HiveMQ broker, 5 boxes)
//! locker-node --locker-id slimlocker1
//!
//! # Local broker, faster cycles
//! locker-node --locker-id L7 --broker-host localhost \
//!     --min-interval 1 --max-interval 2
//!
//! # Reproducible run
//! locker-node --locker-id L7 --seed 42 --log-level debug
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use locker_adapter_mqtt::{Adapter, LockerConfig};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulated MQTT smart locker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Locker identifier used in every topic
    #[arg(short = 'i', long, default_value = "slimlocker1")]
    locker_id: String,

    /// MQTT broker host
    #[arg(long, default_value = "broker.hivemq.com")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// MQTT client id (default: LockerClient_<locker-id>)
    #[arg(long)]
    client_id: Option<String>,

    /// Directory for box records (default: ./locker_<locker-id>)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of boxes created for a new locker
    #[arg(long, default_value = "5")]
    boxes: u32,

    /// Shortest pause between scheduler cycles, seconds
    #[arg(long, default_value = "5")]
    min_interval: u64,

    /// Longest pause between scheduler cycles, seconds
    #[arg(long, default_value = "10")]
    max_interval: u64,

    /// Chance per cycle of simulating activity
    #[arg(long, default_value = "0.5")]
    activity_probability: f64,

    /// Chance that simulated activity flips a box
    #[arg(long, default_value = "0.2")]
    flip_probability: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Fixed RNG seed
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args);

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Locker Node - Simulated Smart Locker            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Locker:   {:<50} ║", truncate(&config.locker_id, 50));
    println!("║  Broker:   {:<50} ║", truncate(&format!("{}:{}", args.broker_host, args.broker_port), 50));
    println!("║  Client:   {:<50} ║", truncate(&config.client_id(), 50));
    println!("║  Data dir: {:<50} ║", truncate(&config.storage.dir.display().to_string(), 50));
    println!("║  Boxes:    {:<50} ║", args.boxes);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let adapter = match Adapter::new(config) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to start locker: {}", e);
            std::process::exit(1);
        }
    };

    // Ctrl-C triggers a clean shutdown
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = stop_tx.send(true);
    });

    info!("Starting locker node...");
    if let Err(e) = adapter.run(stop_rx).await {
        error!("Locker stopped with error: {}", e);
        std::process::exit(1);
    }

    info!("Locker node stopped");
    Ok(())
}

fn build_config(args: &Args) -> LockerConfig {
    let mut config = LockerConfig::new(&args.locker_id)
        .with_broker(&args.broker_host, args.broker_port)
        .with_box_count(args.boxes)
        .with_interval(
            Duration::from_secs(args.min_interval),
            Duration::from_secs(args.max_interval),
        )
        .with_probabilities(args.activity_probability, args.flip_probability);

    if let Some(client_id) = &args.client_id {
        config = config.with_client_id(client_id);
    }
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    config
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
