//! groundbus broker
//!
//! Relays every source to every prefix-matching sink and broadcasts the
//! discovery beacon.
//!
//! Usage:
//!   cargo run --release --bin groundbus_broker -- [OPTIONS]

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use groundbus::{Broker, BusConfig};

#[derive(Parser, Debug)]
#[command(name = "groundbus_broker", about = "Telemetry bus broker")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind the source and sink ports on
    #[arg(short, long)]
    bind: Option<IpAddr>,

    #[arg(long)]
    source_port: Option<u16>,

    #[arg(long)]
    sink_port: Option<u16>,

    #[arg(long)]
    discovery_port: Option<u16>,

    /// Beacon destination (default: LAN broadcast)
    #[arg(long)]
    beacon_target: Option<IpAddr>,

    /// Do not broadcast the discovery beacon
    #[arg(long)]
    no_beacon: bool,

    /// Print only the exit summary
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("❌ Broker error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> groundbus::Result<BusConfig> {
    let mut config = match &args.config {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };

    if let Some(ip) = args.bind {
        config.broker.bind_ip = ip;
    }
    if let Some(port) = args.source_port {
        config.ports.source = port;
    }
    if let Some(port) = args.sink_port {
        config.ports.sink = port;
    }
    if let Some(port) = args.discovery_port {
        config.ports.discovery = port;
    }
    if let Some(ip) = args.beacon_target {
        config.broker.beacon_target = ip;
    }
    if args.no_beacon {
        config.broker.beacon_enabled = false;
    }
    Ok(config)
}

fn run(args: Args) -> groundbus::Result<()> {
    let config = load_config(&args)?;
    let broker = Broker::bind(&config)?.spawn()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| groundbus::BusError::Config(format!("cannot install Ctrl-C handler: {}", e)))?;
    }

    let cadence = config.broker.monitor_interval();
    let stats = Arc::clone(broker.stats());
    let mut stdout = std::io::stdout();

    while running.load(Ordering::SeqCst) {
        thread::sleep(cadence.min(Duration::from_millis(500)));
        if !args.quiet {
            let _ = write!(stdout, "\r{:>10.1} msgs/sec ", stats.rate());
            let _ = stdout.flush();
        }
    }

    let uptime = broker.uptime();
    broker.shutdown();
    stats.print_stats(uptime);
    Ok(())
}
