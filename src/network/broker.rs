//! Broker: event-driven relay from publishers to subscribers
//!
//! Uses mio for non-blocking I/O multiplexing. Three threads:
//! - `relay`: accepts peers, relays `Publish` frames verbatim to every
//!   subscriber whose prefix matches, sends heartbeats
//! - `monitor`: drains the relay's tap ring and tracks messages/second
//! - `beacon`: discovery broadcast (optional)
//!
//! Delivery is best-effort and at-most-once. Nothing is persisted, and a
//! subscriber that cannot keep up loses messages instead of stalling the relay.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};

use super::connection::{set_socket_buffers, Connection, SOCKET_BUFFER_SIZE};
use super::discovery::Beacon;
use super::sleep_while;
use crate::config::{BrokerConfig, BusConfig, PortConfig};
use crate::core::{RingBuffer, ThroughputMeter};
use crate::error::Result;
use crate::protocol::{Encoder, Frame, FrameKind};

const SOURCE_TOKEN: Token = Token(0);
const SINK_TOKEN: Token = Token(1);
const FIRST_PEER_TOKEN: usize = 2;
const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Capacity of the relay → monitor tap
pub const TAP_CAPACITY: usize = 4096;

/// One relayed message as seen by the monitor
#[derive(Debug, Clone, Copy, Default)]
pub struct TapSample {
    pub frame_len: u32,
    /// Subscribers the frame was queued to
    pub fanout: u16,
}

/// Broker statistics, shared with the binary
#[derive(Debug, Default)]
pub struct BrokerStats {
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    messages_dropped: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    publishers: AtomicU64,
    subscribers: AtomicU64,
    /// f64 bits of the current msgs/sec
    rate: AtomicU64,
}

/// Point-in-time copy of `BrokerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub messages_in: u64,
    pub messages_out: u64,
    pub messages_dropped: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub publishers: u64,
    pub subscribers: u64,
    pub rate: f64,
}

impl BrokerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            publishers: self.publishers.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
            rate: self.rate(),
        }
    }

    /// Relayed messages per second, as last measured by the monitor
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn print_stats(&self, uptime: Duration) {
        let s = self.snapshot();
        let secs = uptime.as_secs_f64().max(f64::EPSILON);

        println!("\n📊 Broker Stats (uptime: {:.1}s)", uptime.as_secs_f64());
        println!("   Messages IN:   {} ({:.1}/sec)", s.messages_in, s.messages_in as f64 / secs);
        println!("   Messages OUT:  {} ({:.1}/sec)", s.messages_out, s.messages_out as f64 / secs);
        if s.messages_dropped > 0 {
            println!("   Dropped:       {} ⚠️", s.messages_dropped);
        }
        println!("   Bytes in:      {} KB", s.bytes_in / 1024);
        println!("   Bytes out:     {} KB", s.bytes_out / 1024);
        println!("   Publishers:    {}", s.publishers);
        println!("   Subscribers:   {}", s.subscribers);
    }
}

/// Bound but not yet running broker
pub struct Broker {
    config: BrokerConfig,
    discovery_port: u16,
    source: TcpListener,
    sink: TcpListener,
}

impl Broker {
    /// Bind the source and sink listeners
    pub fn bind(config: &BusConfig) -> Result<Self> {
        let ip = config.broker.bind_ip;
        let source = bind_listener(ip, config.ports.source)?;
        let sink = bind_listener(ip, config.ports.sink)?;

        Ok(Self {
            config: config.broker.clone(),
            discovery_port: config.ports.discovery,
            source,
            sink,
        })
    }

    pub fn source_addr(&self) -> io::Result<SocketAddr> {
        self.source.local_addr()
    }

    pub fn sink_addr(&self) -> io::Result<SocketAddr> {
        self.sink.local_addr()
    }

    /// Actual ports, including any picked by the OS for port 0
    pub fn ports(&self) -> io::Result<PortConfig> {
        Ok(PortConfig {
            source: self.source_addr()?.port(),
            sink: self.sink_addr()?.port(),
            discovery: self.discovery_port,
        })
    }

    /// Start the relay, monitor and beacon threads
    pub fn spawn(self) -> Result<BrokerHandle> {
        let ports = self.ports()?;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(BrokerStats::default());
        let tap: Arc<RingBuffer<TapSample, TAP_CAPACITY>> = Arc::new(RingBuffer::new());

        // everything fallible happens before the first thread starts
        let beacon = if self.config.beacon_enabled {
            let target = SocketAddr::new(self.config.beacon_target, ports.discovery);
            Some(Beacon::new(target, self.config.beacon_interval())?)
        } else {
            None
        };
        let mut relay = Relay::new(
            self.source,
            self.sink,
            self.config.heartbeat_interval(),
            Arc::clone(&tap),
            Arc::clone(&stats),
        )?;

        let mut startup = Startup::new(Arc::clone(&running));
        {
            let running = Arc::clone(&running);
            startup.spawn(named("relay"), move || relay.run(&running))?;
        }
        {
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            let interval = self.config.monitor_interval();
            startup.spawn(named("monitor"), move || {
                monitor_loop(&tap, &stats, interval, &running)
            })?;
        }
        if let Some(beacon) = beacon {
            let running = Arc::clone(&running);
            log::info!("beacon broadcasting to {}", beacon.target());
            startup.spawn(named("beacon"), move || beacon.run(&running))?;
        }

        log::info!(
            "broker up: sources on port {}, sinks on port {}",
            ports.source,
            ports.sink
        );

        Ok(BrokerHandle {
            running,
            stats,
            ports,
            threads: startup.threads,
            started: Instant::now(),
        })
    }
}

fn named(name: &str) -> thread::Builder {
    thread::Builder::new().name(name.into())
}

/// Threads started so far. If one fails to start, the others are stopped
/// and joined so no listener outlives the error.
struct Startup {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Startup {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            running,
            threads: Vec::with_capacity(3),
        }
    }

    fn spawn<F>(&mut self, builder: thread::Builder, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match builder.spawn(f) {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("cannot start broker thread: {}", e);
                self.running.store(false, Ordering::Relaxed);
                for handle in self.threads.drain(..) {
                    let _ = handle.join();
                }
                Err(e)
            }
        }
    }
}

fn bind_listener(ip: IpAddr, port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((ip, port)).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot bind {}:{}: {}", ip, port, e))
    })?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Running broker. Dropping it shuts the broker down.
pub struct BrokerHandle {
    running: Arc<AtomicBool>,
    stats: Arc<BrokerStats>,
    ports: PortConfig,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
}

impl BrokerHandle {
    pub fn stats(&self) -> &Arc<BrokerStats> {
        &self.stats
    }

    pub fn ports(&self) -> PortConfig {
        self.ports
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop all threads; every peer sees its connection close
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("broker").to_string();
            if handle.join().is_err() {
                log::error!("{} thread panicked", name);
            }
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Publisher,
    /// Connected to the sink port, subscribe frame not seen yet
    Pending,
    Subscriber(Vec<Vec<u8>>),
}

struct Peer {
    conn: Connection<MioTcpStream>,
    addr: SocketAddr,
    role: Role,
    writable_interest: bool,
}

impl Peer {
    fn accepts(&self, channel: &[u8]) -> bool {
        match &self.role {
            Role::Subscriber(prefixes) => prefixes.iter().any(|p| channel.starts_with(p)),
            _ => false,
        }
    }
}

struct Relay {
    poll: Poll,
    source: MioTcpListener,
    sink: MioTcpListener,
    peers: HashMap<Token, Peer>,
    next_token: usize,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
    encoder: Encoder,
    tap: Arc<RingBuffer<TapSample, TAP_CAPACITY>>,
    stats: Arc<BrokerStats>,
}

impl Relay {
    fn new(
        source: TcpListener,
        sink: TcpListener,
        heartbeat_interval: Duration,
        tap: Arc<RingBuffer<TapSample, TAP_CAPACITY>>,
        stats: Arc<BrokerStats>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut source = MioTcpListener::from_std(source);
        let mut sink = MioTcpListener::from_std(sink);
        poll.registry()
            .register(&mut source, SOURCE_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut sink, SINK_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            source,
            sink,
            peers: HashMap::new(),
            next_token: FIRST_PEER_TOKEN,
            heartbeat_interval,
            last_heartbeat: Instant::now(),
            encoder: Encoder::new(64 * 1024),
            tap,
            stats,
        })
    }

    fn run(&mut self, running: &AtomicBool) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("relay poll failed: {}", e);
                break;
            }

            let mut published: Vec<Frame> = Vec::new();
            let mut dead: Vec<Token> = Vec::new();

            for event in events.iter() {
                match event.token() {
                    SOURCE_TOKEN => self.accept(true),
                    SINK_TOKEN => self.accept(false),
                    token => {
                        if event.is_readable() || event.is_read_closed() {
                            if let Err(reason) = self.read_peer(token, &mut published) {
                                self.log_disconnect(token, &reason);
                                dead.push(token);
                                continue;
                            }
                        }
                        if event.is_writable() {
                            if let Some(peer) = self.peers.get_mut(&token) {
                                if let Err(e) = peer.conn.flush_write_buffer() {
                                    self.log_disconnect(token, &e.to_string());
                                    dead.push(token);
                                }
                            }
                        }
                    }
                }
            }

            for frame in &published {
                self.fan_out(frame, &mut dead);
            }

            if self.last_heartbeat.elapsed() >= self.heartbeat_interval {
                self.last_heartbeat = Instant::now();
                self.heartbeat(&mut dead);
            }

            for token in dead {
                self.remove(token);
            }
            self.update_interest();
        }

        log::info!("relay stopped, closing {} connections", self.peers.len());
    }

    fn accept(&mut self, publisher: bool) {
        loop {
            let listener = if publisher { &self.source } else { &self.sink };
            let (mut stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept error: {}", e);
                    break;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("TCP_NODELAY on {}: {}", addr, e);
            }
            set_socket_buffers(&stream, SOCKET_BUFFER_SIZE);

            let token = Token(self.next_token);
            self.next_token += 1;
            if let Err(e) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                log::warn!("cannot register {}: {}", addr, e);
                continue;
            }

            let role = if publisher {
                self.stats.publishers.fetch_add(1, Ordering::Relaxed);
                Role::Publisher
            } else {
                Role::Pending
            };
            log::info!(
                "{} connected: {}",
                if publisher { "publisher" } else { "subscriber" },
                addr
            );
            self.peers.insert(
                token,
                Peer {
                    conn: Connection::new(stream),
                    addr,
                    role,
                    writable_interest: false,
                },
            );
        }
    }

    /// Drain the socket (edge-triggered) and decode every complete frame
    fn read_peer(
        &mut self,
        token: Token,
        published: &mut Vec<Frame>,
    ) -> std::result::Result<(), String> {
        let Some(peer) = self.peers.get_mut(&token) else {
            return Ok(());
        };

        loop {
            let n = peer.conn.fill_read_buffer().map_err(|e| e.to_string())?;

            while let Some(frame) = peer.conn.next_frame().map_err(|e| e.to_string())? {
                match frame.kind() {
                    FrameKind::Publish if peer.role == Role::Publisher => {
                        self.stats.messages_in.fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .bytes_in
                            .fetch_add(frame.as_bytes().len() as u64, Ordering::Relaxed);
                        published.push(frame);
                    }
                    FrameKind::Subscribe if peer.role != Role::Publisher => {
                        if peer.role == Role::Pending {
                            self.stats.subscribers.fetch_add(1, Ordering::Relaxed);
                        }
                        let prefixes: Vec<Vec<u8>> = frame.parts().map(<[u8]>::to_vec).collect();
                        log::debug!("{} subscribed to {} prefixes", peer.addr, prefixes.len());
                        peer.role = Role::Subscriber(prefixes);

                        // confirms the subscription: nothing relayed before it
                        self.encoder.reset();
                        let ack = self.encoder.encode_heartbeat().map_err(|e| e.to_string())?;
                        peer.conn.queue_write(ack).map_err(|e| e.to_string())?;
                    }
                    kind => {
                        log::debug!("ignoring {:?} frame from {} ({:?})", kind, peer.addr, peer.role);
                    }
                }
            }

            if n == 0 {
                return Ok(());
            }
        }
    }

    fn fan_out(&mut self, frame: &Frame, dead: &mut Vec<Token>) {
        let Some(channel) = frame.channel() else {
            return;
        };
        let bytes = frame.as_bytes();
        let mut fanout: u16 = 0;

        for (token, peer) in self.peers.iter_mut() {
            if !peer.accepts(channel) {
                continue;
            }
            match peer.conn.queue_write(bytes) {
                Ok(true) => {
                    fanout = fanout.saturating_add(1);
                    self.stats.messages_out.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_out
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::trace!("{} is behind, dropped a frame", peer.addr);
                }
                Err(e) => {
                    log::info!("subscriber {} disconnected: {}", peer.addr, e);
                    dead.push(*token);
                }
            }
        }

        // a full tap only costs the monitor a sample
        let _ = self.tap.push(TapSample {
            frame_len: bytes.len() as u32,
            fanout,
        });
    }

    fn heartbeat(&mut self, dead: &mut Vec<Token>) {
        self.encoder.reset();
        let Ok(beat) = self.encoder.encode_heartbeat() else {
            return;
        };

        for (token, peer) in self.peers.iter_mut() {
            if !matches!(peer.role, Role::Subscriber(_)) {
                continue;
            }
            if let Err(e) = peer.conn.queue_write(beat) {
                log::info!("subscriber {} disconnected: {}", peer.addr, e);
                dead.push(*token);
            }
        }
    }

    fn log_disconnect(&self, token: Token, reason: &str) {
        if let Some(peer) = self.peers.get(&token) {
            let kind = match peer.role {
                Role::Publisher => "publisher",
                _ => "subscriber",
            };
            log::info!("{} {} disconnected: {}", kind, peer.addr, reason);
        }
    }

    fn remove(&mut self, token: Token) {
        let Some(mut peer) = self.peers.remove(&token) else {
            return;
        };
        match peer.role {
            Role::Publisher => {
                self.stats.publishers.fetch_sub(1, Ordering::Relaxed);
            }
            Role::Subscriber(_) => {
                self.stats.subscribers.fetch_sub(1, Ordering::Relaxed);
            }
            Role::Pending => {}
        }
        let _ = self.poll.registry().deregister(peer.conn.stream_mut());
    }

    /// Ask for writable events only while a peer has bytes pending
    fn update_interest(&mut self) {
        for (token, peer) in self.peers.iter_mut() {
            let want = peer.conn.write_pending() > 0;
            if want == peer.writable_interest {
                continue;
            }
            let interest = if want {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            match self
                .poll
                .registry()
                .reregister(peer.conn.stream_mut(), *token, interest)
            {
                Ok(()) => peer.writable_interest = want,
                Err(e) => log::warn!("reregister {}: {}", peer.addr, e),
            }
        }
    }
}

fn monitor_loop(
    tap: &RingBuffer<TapSample, TAP_CAPACITY>,
    stats: &BrokerStats,
    interval: Duration,
    running: &AtomicBool,
) {
    let mut meter = ThroughputMeter::default();
    meter.record(0);

    while running.load(Ordering::Relaxed) {
        sleep_while(running, interval);

        let mut bytes = 0u64;
        let count = tap.drain(|sample| bytes += u64::from(sample.frame_len)) as u64;
        meter.record(count);
        stats.set_rate(meter.rate());

        if count > 0 {
            log::trace!("monitor: {} messages, {} bytes", count, bytes);
        }
    }
}
