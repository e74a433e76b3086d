//! groundbus replay
//!
//! Re-publishes a recorded journal at its recorded relative offsets.
//!
//! Usage:
//!   groundbus_replay bus.journal [--speed 2.0]

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use groundbus::core::{replay, JournalReader};
use groundbus::{BusConfig, Communicator, Sender};

#[derive(Parser, Debug)]
#[command(name = "groundbus_replay", about = "Replay a recorded journal onto the bus")]
struct Args {
    /// Journal written by `groundbus_listen --record`
    journal: PathBuf,

    /// Playback speed; 2.0 plays twice as fast
    #[arg(short, long, default_value_t = 1.0)]
    speed: f64,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, skips discovery
    #[arg(short, long)]
    broker: Option<IpAddr>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> groundbus::Result<()> {
    let mut config = match &args.config {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };
    if args.broker.is_some() {
        config.client.broker = args.broker;
    }

    let reader = JournalReader::open(&args.journal)?;
    let comm = Communicator::new(&config);
    let mut sender = Sender::new(&comm, "replay")?;

    let started = Instant::now();
    let stats = replay(reader, args.speed, |msg| sender.send_message(msg))?;
    sender.flush(Duration::from_secs(1));

    println!(
        "replayed {} messages in {:.1}s ({} dropped)",
        stats.delivered,
        started.elapsed().as_secs_f64(),
        stats.dropped
    );
    Ok(())
}
