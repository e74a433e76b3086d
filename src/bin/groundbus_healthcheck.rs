//! groundbus healthcheck
//!
//! Round-trips one message through the broker and exits 0 if it comes back
//! unchanged, 1 otherwise. Prints nothing, so it can back a container
//! health check.
//!
//! Usage:
//!   groundbus_healthcheck [--broker 10.0.0.2] [--timeout 5]

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use groundbus::protocol::now;
use groundbus::{BusConfig, Communicator, Receiver, Sender};
use serde_json::json;

const CHANNEL: &str = "HEALTHCHECK";
const ALIVE: &str = "_ALIVE";

#[derive(Parser, Debug)]
#[command(name = "groundbus_healthcheck", about = "Check that the broker relays messages")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, skips discovery
    #[arg(short, long)]
    broker: Option<IpAddr>,

    /// Seconds to wait for each phase
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    match run(args) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("healthcheck failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> groundbus::Result<bool> {
    let mut config = match &args.config {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };
    if args.broker.is_some() {
        config.client.broker = args.broker;
    }
    let timeout = Duration::from_secs(args.timeout);

    let comm = Communicator::new(&config);
    let receiver = Receiver::new(&comm, &[CHANNEL])?;
    let mut sender = Sender::new(&comm, CHANNEL)?;

    // the path is up once one of our own messages comes back
    let deadline = Instant::now() + timeout;
    loop {
        sender.send(json!(ALIVE))?;
        if receiver.recv(Some(Duration::from_millis(200))).is_some() {
            break;
        }
        if Instant::now() >= deadline {
            log::warn!("no message came back within {:?}", timeout);
            return Ok(false);
        }
    }

    let expected = json!({
        "timestamp": now(),
        "healthcheck_id": fastrand::u64(..),
    });
    sender.send(expected.clone())?;

    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match receiver.recv(Some(left)) {
            Some(payload) if payload == expected => return Ok(true),
            Some(_) => continue,
            None => break,
        }
    }
    log::warn!("healthcheck message did not come back");
    Ok(false)
}
