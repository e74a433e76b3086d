//! groundbus listen
//!
//! Console sink: prints every message on the given channel prefixes and
//! optionally records them to a journal for later replay.
//!
//! Usage:
//!   groundbus_listen [PREFIX]... [--record bus.journal]

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use groundbus::core::JournalWriter;
use groundbus::{BusConfig, Communicator, FallbackPolicy, Receiver};

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "groundbus_listen", about = "Print bus traffic")]
struct Args {
    /// Channel prefixes; none means everything
    prefixes: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, skips discovery
    #[arg(short, long)]
    broker: Option<IpAddr>,

    /// Ask for the broker address if no beacon is heard
    #[arg(long)]
    prompt: bool,

    /// Append every message to this journal
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Do not print messages
    #[arg(short, long)]
    quiet: bool,

    /// Exit after this many messages
    #[arg(short = 'n', long)]
    count: Option<u64>,
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
    if args.prompt {
        config.client.fallback = FallbackPolicy::Prompt;
    }

    let prefixes = if args.prefixes.is_empty() {
        vec![String::new()]
    } else {
        args.prefixes.clone()
    };

    let comm = Communicator::new(&config);
    let receiver = Receiver::new(&comm, &prefixes)?;
    let mut journal = match &args.record {
        Some(path) => Some(JournalWriter::create(path)?),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| groundbus::BusError::Config(format!("cannot install Ctrl-C handler: {}", e)))?;
    }

    log::info!("listening on {:?}", prefixes);
    let mut received = 0u64;
    let mut last_flush = Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(msg) = receiver.recv_message(Some(Duration::from_millis(200))) {
            received += 1;
            if !args.quiet {
                println!("{} {:.3} {}", msg.channel, msg.timestamp, msg.payload);
            }
            if let Some(journal) = journal.as_mut() {
                journal.append(&msg)?;
            }
            if args.count.is_some_and(|n| received >= n) {
                break;
            }
        }

        if let Some(journal) = journal.as_mut() {
            if last_flush.elapsed() >= FLUSH_INTERVAL {
                journal.flush()?;
                last_flush = Instant::now();
            }
        }
    }

    if let Some(mut journal) = journal {
        journal.flush()?;
        log::info!("recorded {} messages", journal.written());
    }
    receiver.close();
    Ok(())
}
