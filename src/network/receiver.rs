//! Subscribing endpoint with silence-driven reconnect

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::communicator::Communicator;
use super::connection::Connection;
use super::lock;
use crate::error::{BusError, Result};
use crate::protocol::{Encoder, FrameKind, Message};

/// Longest single wait while holding the socket lock
const RECV_SLICE: Duration = Duration::from_millis(50);
/// How long a new subscription may take to be confirmed
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_STEP: Duration = Duration::from_millis(10);

/// Receives messages whose channel starts with any of its prefixes
///
/// `recv_message` takes `&self`, so a receiver can be shared (`Arc`) and
/// closed from another thread while a receive is waiting.
pub struct Receiver {
    shared: Arc<Shared>,
    communicator: Communicator,
    prefixes: Arc<[String]>,
}

struct Shared {
    /// The live connection; swapped only under this lock
    link: Mutex<Option<Connection<TcpStream>>>,
    /// Clone of the live socket, used to interrupt a blocked read
    interrupt: Mutex<Option<TcpStream>>,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
    reconnecting: AtomicBool,
}

impl Shared {
    fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn silent_for(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    fn install(&self, conn: Connection<TcpStream>, interrupt: TcpStream) {
        *lock(&self.interrupt) = Some(interrupt);
        *lock(&self.link) = Some(conn);
        self.touch();
    }
}

/// Outcome of one receive slice
enum Step {
    Message(Message),
    Idle,
    Lost(String),
    Offline,
}

impl Receiver {
    /// Resolve the broker and subscribe to `prefixes`
    ///
    /// `""` subscribes to everything. Fails only if the broker address cannot
    /// be resolved; an unreachable broker is retried in the background.
    pub fn new<S: AsRef<str>>(communicator: &Communicator, prefixes: &[S]) -> Result<Self> {
        communicator.resolve()?;

        let receiver = Self {
            shared: Arc::new(Shared {
                link: Mutex::new(None),
                interrupt: Mutex::new(None),
                last_seen: Mutex::new(Instant::now()),
                closed: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
            }),
            communicator: communicator.clone(),
            prefixes: prefixes.iter().map(|p| p.as_ref().to_string()).collect(),
        };

        match subscribe(&receiver.communicator, &receiver.prefixes) {
            Ok((conn, interrupt)) => receiver.shared.install(conn, interrupt),
            Err(e) => {
                log::warn!("receiver {:?} cannot reach broker: {}", receiver.prefixes, e);
                receiver.start_reconnect();
            }
        }
        Ok(receiver)
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.link).is_some()
    }

    /// Next message
    ///
    /// `None` waits indefinitely, a zero timeout polls once. Returns `None`
    /// on timeout, during a broker outage, or once the receiver is closed.
    pub fn recv_message(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let grace = self.communicator.config().reconnect_grace();

        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            let slice = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(RECV_SLICE),
                None => RECV_SLICE,
            };

            let step = {
                let mut link = lock(&self.shared.link);
                let step = match link.as_mut() {
                    None => Step::Offline,
                    Some(conn) => match self.poll(conn, slice) {
                        Ok(Some(msg)) => Step::Message(msg),
                        Ok(None) if self.shared.silent_for() > grace => {
                            Step::Lost(format!("no traffic for {:.1}s", grace.as_secs_f64()))
                        }
                        Ok(None) => Step::Idle,
                        Err(e) => Step::Lost(e.to_string()),
                    },
                };
                if matches!(step, Step::Lost(_)) {
                    *link = None;
                }
                step
            };

            match step {
                Step::Message(msg) => return Some(msg),
                Step::Idle => {}
                Step::Lost(reason) => self.go_stale(&reason),
                Step::Offline => {
                    self.start_reconnect();
                    thread::sleep(slice);
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
        }
    }

    /// Payload of the next message
    pub fn recv(&self, timeout: Option<Duration>) -> Option<Value> {
        self.recv_message(timeout).map(|msg| msg.payload)
    }

    /// Stop receiving and interrupt any waiting `recv_message`
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(stream) = lock(&self.shared.interrupt).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        *lock(&self.shared.link) = None;
        log::debug!("receiver {:?} closed", self.prefixes);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Wait up to `slice` for one message from `conn`
    fn poll(&self, conn: &mut Connection<TcpStream>, slice: Duration) -> Result<Option<Message>> {
        let mut read = false;
        loop {
            while let Some(frame) = conn.next_frame()? {
                self.shared.touch();
                if frame.kind() != FrameKind::Publish {
                    continue;
                }
                let Some(channel) = frame.channel() else {
                    continue;
                };
                if !self
                    .prefixes
                    .iter()
                    .any(|p| channel.starts_with(p.as_bytes()))
                {
                    continue;
                }
                match frame.to_message() {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => log::warn!("skipping malformed message: {}", e),
                }
            }

            if read || self.shared.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            let stream = conn.stream();
            if slice.is_zero() {
                stream.set_nonblocking(true)?;
            } else {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(slice))?;
            }
            if conn.fill_read_buffer()? == 0 {
                return Ok(None);
            }
            read = true;
        }
    }

    fn go_stale(&self, reason: &str) {
        if self.is_closed() {
            return;
        }
        log::warn!("receiver {:?}: {}; reconnecting", self.prefixes, reason);
        self.communicator.mark_stale();
        lock(&self.shared.interrupt).take();
        self.start_reconnect();
    }

    /// Start the reconnect worker unless one is already running
    fn start_reconnect(&self) {
        if self.is_closed() || self.shared.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let communicator = self.communicator.clone();
        let prefixes = Arc::clone(&self.prefixes);

        let spawned = thread::Builder::new()
            .name("reconnect".into())
            .spawn(move || {
                reconnect_loop(&shared, &communicator, &prefixes);
                shared.reconnecting.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            log::error!("cannot start reconnect worker: {}", e);
            self.shared.reconnecting.store(false, Ordering::Release);
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.close();
    }
}

fn reconnect_loop(shared: &Shared, communicator: &Communicator, prefixes: &[String]) {
    let interval = communicator.config().reconnect_interval();

    while !shared.closed.load(Ordering::Acquire) {
        match subscribe(communicator, prefixes) {
            Ok((conn, interrupt)) => {
                let mut link = lock(&shared.link);
                if shared.closed.load(Ordering::Acquire) {
                    let _ = interrupt.shutdown(Shutdown::Both);
                    return;
                }
                *lock(&shared.interrupt) = Some(interrupt);
                *link = Some(conn);
                drop(link);
                shared.touch();
                log::info!("receiver {:?} is online", prefixes);
                return;
            }
            Err(e) => {
                log::debug!("reconnect attempt failed: {}", e);
                let retry_at = Instant::now() + interval;
                while Instant::now() < retry_at && !shared.closed.load(Ordering::Acquire) {
                    thread::sleep(RETRY_STEP);
                }
            }
        }
    }
}

/// Connect to the sink port and wait for the broker to confirm `prefixes`
fn subscribe(
    communicator: &Communicator,
    prefixes: &[String],
) -> Result<(Connection<TcpStream>, TcpStream)> {
    let addr = communicator.sink_addr()?;
    let mut stream = communicator.connect(addr)?;

    let mut encoder = Encoder::new(256);
    stream.write_all(encoder.encode_subscribe(prefixes)?)?;

    let interrupt = stream.try_clone()?;
    stream.set_read_timeout(Some(SUBSCRIBE_TIMEOUT))?;
    let mut conn = Connection::new(stream);

    // the broker answers a subscribe with a heartbeat
    loop {
        if let Some(frame) = conn.next_frame()? {
            if frame.kind() == FrameKind::Heartbeat {
                break;
            }
            continue;
        }
        if conn.fill_read_buffer()? == 0 {
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "broker did not confirm the subscription",
            )));
        }
    }

    log::debug!("subscribed to {:?} at {}", prefixes, addr);
    Ok((conn, interrupt))
}
