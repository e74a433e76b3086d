//! Broker address resolution shared by a process's senders and receivers

use std::io::{self, BufRead, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connection::{set_socket_buffers, SOCKET_BUFFER_SIZE};
use super::discovery::listen_for_beacon;
use super::lock;
use crate::config::{BusConfig, ClientConfig, FallbackPolicy, PortConfig};
use crate::error::{BusError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a process stands with respect to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unresolved,
    Discovering,
    Resolved(IpAddr),
    /// Was resolved, but traffic stopped; the next `resolve` rediscovers
    Stale(IpAddr),
}

/// Resolves and remembers the broker address
///
/// Cheap to clone; clones share state. `resolve` is idempotent and
/// serialized, so concurrent callers all get the same address.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
}

struct Inner {
    ports: PortConfig,
    config: ClientConfig,
    state: Mutex<LinkState>,
    resolving: Mutex<()>,
}

impl Communicator {
    pub fn new(config: &BusConfig) -> Self {
        Self::with_config(config.ports, config.client.clone())
    }

    pub fn with_config(ports: PortConfig, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ports,
                config,
                state: Mutex::new(LinkState::Unresolved),
                resolving: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.inner.state)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn ports(&self) -> PortConfig {
        self.inner.ports
    }

    /// Broker address, discovering it first if needed
    pub fn resolve(&self) -> Result<IpAddr> {
        let _resolving = lock(&self.inner.resolving);

        let previous = match self.state() {
            LinkState::Resolved(ip) => return Ok(ip),
            LinkState::Stale(ip) => Some(ip),
            LinkState::Unresolved | LinkState::Discovering => None,
        };
        self.set_state(LinkState::Discovering);

        match self.discover(previous) {
            Ok(ip) => {
                if previous.is_some_and(|p| p != ip) {
                    log::info!("broker moved to {}", ip);
                } else {
                    log::info!("broker at {}", ip);
                }
                self.set_state(LinkState::Resolved(ip));
                Ok(ip)
            }
            Err(e) => {
                self.set_state(previous.map_or(LinkState::Unresolved, LinkState::Stale));
                Err(e)
            }
        }
    }

    /// Forget that the current address works; the next `resolve` rediscovers
    pub fn mark_stale(&self) {
        let mut state = lock(&self.inner.state);
        if let LinkState::Resolved(ip) = *state {
            log::warn!("link to broker {} went stale", ip);
            *state = LinkState::Stale(ip);
        }
    }

    pub fn source_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.resolve()?, self.inner.ports.source))
    }

    pub fn sink_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.resolve()?, self.inner.ports.sink))
    }

    /// Open a TCP connection to `addr`, marking the link stale on failure
    pub(crate) fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
            self.mark_stale();
            e
        })?;
        stream.set_nodelay(true)?;
        set_socket_buffers(&stream, SOCKET_BUFFER_SIZE);
        Ok(stream)
    }

    fn set_state(&self, state: LinkState) {
        *lock(&self.inner.state) = state;
    }

    /// `previous` is set when re-resolving; that path never prompts
    fn discover(&self, previous: Option<IpAddr>) -> Result<IpAddr> {
        let config = &self.inner.config;
        if let Some(ip) = config.broker {
            return Ok(ip);
        }

        let timeout = config.discovery_timeout();
        match listen_for_beacon(self.inner.ports.discovery, timeout) {
            Ok(Some(ip)) => return Ok(ip),
            Ok(None) => {
                log::debug!("no beacon within {} ms", config.discovery_timeout_ms);
            }
            Err(e) => {
                log::warn!(
                    "cannot listen for beacons on port {}: {}",
                    self.inner.ports.discovery,
                    e
                );
            }
        }

        let failed = BusError::DiscoveryFailed {
            timeout_ms: config.discovery_timeout_ms,
        };
        match (config.fallback, previous) {
            (FallbackPolicy::Address(ip), _) => {
                log::info!("no beacon heard, using fallback address {}", ip);
                Ok(ip)
            }
            (_, Some(ip)) => Ok(ip),
            (FallbackPolicy::Fail, None) => Err(failed),
            (FallbackPolicy::Prompt, None) => prompt_for_address(io::stdin().lock(), failed),
        }
    }
}

/// Ask on the terminal until a valid address is entered
fn prompt_for_address<R: BufRead>(mut input: R, on_eof: BusError) -> Result<IpAddr> {
    let mut line = String::new();
    loop {
        eprint!("No broker beacon heard. Broker IP address: ");
        io::stderr().flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(on_eof);
        }
        let entered = line.trim();
        if entered.is_empty() {
            continue;
        }
        match entered.parse() {
            Ok(ip) => return Ok(ip),
            Err(_) => eprintln!("'{}' is not an IP address", entered),
        }
    }
}
