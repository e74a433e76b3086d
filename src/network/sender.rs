//! Publishing endpoint

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::communicator::Communicator;
use super::connection::Connection;
use super::lock;
use crate::error::Result;
use crate::protocol::{Encoder, Message};

/// Publishes messages to the broker's source port
///
/// Sends never block on the network. While the broker is unreachable,
/// messages are dropped and a background worker re-resolves and reconnects,
/// at most once per `reconnect_interval`.
pub struct Sender {
    communicator: Communicator,
    channel: String,
    conn: Option<Connection<TcpStream>>,
    encoder: Encoder,
    last_attempt: Option<Instant>,
    dialer: Arc<Dialer>,
    sent: u64,
    dropped: u64,
}

/// Hand-off between the send path and the connect worker
#[derive(Default)]
struct Dialer {
    ready: Mutex<Option<TcpStream>>,
    dialing: AtomicBool,
}

impl Sender {
    /// Resolve the broker and connect
    ///
    /// Fails only if the broker address cannot be resolved; an unreachable
    /// broker is retried on later sends.
    pub fn new(communicator: &Communicator, channel: impl Into<String>) -> Result<Self> {
        communicator.resolve()?;

        let mut sender = Self {
            communicator: communicator.clone(),
            channel: channel.into(),
            conn: None,
            encoder: Encoder::new(4096),
            last_attempt: Some(Instant::now()),
            dialer: Arc::default(),
            sent: 0,
            dropped: 0,
        };
        match dial(&sender.communicator) {
            Ok(stream) => sender.adopt(stream),
            Err(e) => log::warn!("sender {:?} cannot reach broker: {}", sender.channel, e),
        }
        Ok(sender)
    }

    /// Default channel used by `send`
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Publish on the default channel with the current time
    pub fn send(&mut self, payload: Value) -> Result<bool> {
        let msg = Message::new(self.channel.clone(), payload);
        self.send_message(&msg)
    }

    /// Publish on `channel` with the current time
    pub fn send_on(&mut self, channel: &str, payload: Value) -> Result<bool> {
        self.send_message(&Message::new(channel, payload))
    }

    /// Publish `msg` on its own channel
    ///
    /// Returns whether the message reached the transport. Only envelope
    /// encoding failures are errors.
    pub fn send_message(&mut self, msg: &Message) -> Result<bool> {
        if self.conn.is_none() {
            self.reconnect();
        }

        self.encoder.reset();
        let frame = self.encoder.encode_message(msg)?;

        let Some(conn) = self.conn.as_mut() else {
            self.dropped += 1;
            return Ok(false);
        };

        // the broker never writes to publishers; EOF here means it went away
        let alive = conn
            .fill_read_buffer()
            .and_then(|_| conn.queue_write(frame));
        match alive {
            Ok(true) => {
                self.sent += 1;
                Ok(true)
            }
            Ok(false) => {
                log::debug!("send buffer full, dropped message on {:?}", msg.channel);
                self.dropped += 1;
                Ok(false)
            }
            Err(e) => {
                log::warn!("lost connection to broker: {}", e);
                self.conn = None;
                self.dropped += 1;
                Ok(false)
            }
        }
    }

    /// Push queued bytes out, waiting at most `timeout`
    ///
    /// Returns whether everything was written.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        loop {
            if let Err(e) = conn.flush_write_buffer() {
                log::warn!("flush to broker failed: {}", e);
                self.conn = None;
                return false;
            }
            if conn.write_pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Messages handed to the transport
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages dropped: no connection, backpressure or a failed write
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Pick up a stream the worker finished, or start a worker
    fn reconnect(&mut self) {
        let ready = lock(&self.dialer.ready).take();
        if let Some(stream) = ready {
            self.adopt(stream);
            return;
        }

        let interval = self.communicator.config().reconnect_interval();
        if self.last_attempt.is_some_and(|at| at.elapsed() < interval) {
            return;
        }
        if self.dialer.dialing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.last_attempt = Some(Instant::now());

        let dialer = Arc::clone(&self.dialer);
        let communicator = self.communicator.clone();
        let channel = self.channel.clone();
        let spawned = thread::Builder::new()
            .name("sender-connect".into())
            .spawn(move || {
                match dial(&communicator) {
                    Ok(stream) => *lock(&dialer.ready) = Some(stream),
                    Err(e) => log::debug!("sender {:?} cannot reach broker: {}", channel, e),
                }
                dialer.dialing.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            log::error!("cannot start connect worker: {}", e);
            self.dialer.dialing.store(false, Ordering::Release);
        }
    }

    fn adopt(&mut self, stream: TcpStream) {
        if let Ok(addr) = stream.peer_addr() {
            log::info!("sender {:?} connected to {}", self.channel, addr);
        }
        self.conn = Some(Connection::new(stream));
    }
}

/// Resolve and connect; may block for discovery and the connect timeout
fn dial(communicator: &Communicator) -> Result<TcpStream> {
    let stream = communicator.connect(communicator.source_addr()?)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.flush(Duration::from_millis(100));
        }
    }
}
