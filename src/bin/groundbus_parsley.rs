//! groundbus parsley
//!
//! Hardware frame gateway: reads frame lines from a serial port (or stdin),
//! decodes them with the static tables and publishes each decoded frame on
//! `CAN/Parsley`.
//!
//! Usage:
//!   groundbus_parsley /dev/ttyACM0 [--format usb|logger] [--solo]
//!   groundbus_parsley - < capture.txt

use std::io::{self, BufRead, BufReader};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use groundbus::codec::{default_registry, LineFormat, LineFormatter};
use groundbus::{BusConfig, BusError, Communicator, Sender};

const CHANNEL: &str = "CAN/Parsley";
/// How often a quiet serial read returns to check for Ctrl-C
const SERIAL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// `$SID:hh,hh,...` from a board's USB debug port
    Usb,
    /// Lines written by the CAN logger board
    Logger,
}

impl From<Format> for LineFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Usb => LineFormat::Usb,
            Format::Logger => LineFormat::Logger,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "groundbus_parsley", about = "Decode hardware frames onto the bus")]
struct Args {
    /// Serial port to read from, or - for stdin
    port: String,

    /// Line format of the input
    #[arg(short, long, value_enum, default_value_t = Format::Usb)]
    format: Format,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Only print decoded frames, do not connect to the bus
    #[arg(long)]
    solo: bool,

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

fn open_input(port: &str, baud: u32) -> groundbus::Result<Box<dyn BufRead>> {
    if port == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let serial = serialport::new(port, baud)
        .timeout(SERIAL_TIMEOUT)
        .open()
        .map_err(io::Error::from)?;
    log::info!("reading {} at {} baud", port, baud);
    Ok(Box::new(BufReader::new(serial)))
}

fn run(args: Args) -> groundbus::Result<()> {
    let mut config = match &args.config {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };
    if args.broker.is_some() {
        config.client.broker = args.broker;
    }

    let registry = default_registry()?;
    let formatter = LineFormatter::new(&registry);
    let format = LineFormat::from(args.format);

    let mut sender = if args.solo {
        None
    } else {
        Some(Sender::new(&Communicator::new(&config), CHANNEL)?)
    };
    let mut input = open_input(&args.port, args.baud)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        // a second Ctrl-C gets out of a blocked stdin read
        ctrlc::set_handler(move || {
            if !running.swap(false, Ordering::SeqCst) {
                std::process::exit(130);
            }
        })
        .map_err(|e| BusError::Config(format!("cannot install Ctrl-C handler: {}", e)))?;
    }

    let mut buf = Vec::new();
    while running.load(Ordering::SeqCst) {
        match input.read_until(b'\n', &mut buf) {
            Ok(0) if buf.is_empty() => break,
            Ok(_) => {}
            // a partial line stays in `buf` until the rest arrives
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => return Err(e.into()),
        }

        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
        buf.clear();

        // boards print a dot for a repeated frame
        if line.trim() == "." {
            println!(".");
            continue;
        }

        let frame = match format.parse(&line) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                println!("{} {}", e, line);
                continue;
            }
        };
        let decoded = match registry.decode(frame.id, &frame.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                println!("{} {}", e, line);
                continue;
            }
        };

        println!("{}", formatter.format(&decoded));
        if let Some(sender) = sender.as_mut() {
            sender.send(decoded.to_payload())?;
        }
    }

    if let Some(mut sender) = sender {
        sender.flush(Duration::from_secs(1));
        log::info!("published {} frames ({} dropped)", sender.sent(), sender.dropped());
    }
    Ok(())
}
