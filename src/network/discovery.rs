//! LAN broker discovery
//!
//! The broker sends a fixed marker datagram on the discovery port at a fixed
//! interval. A client takes the *source address* of the first marker it hears
//! as the broker address; the datagram content only identifies the bus.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use super::sleep_while;

/// Payload of every beacon datagram
pub const BEACON_MARKER: &[u8] = b"groundbus";

/// Broker side: periodic beacon sender
pub struct Beacon {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
}

impl Beacon {
    pub fn new(target: SocketAddr, interval: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            target,
            interval,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send_once(&self) -> io::Result<()> {
        self.socket.send_to(BEACON_MARKER, self.target)?;
        Ok(())
    }

    /// Send until `running` turns false
    pub fn run(&self, running: &AtomicBool) {
        let mut failing = false;
        while running.load(std::sync::atomic::Ordering::Relaxed) {
            match self.send_once() {
                Ok(()) if failing => {
                    log::info!("beacon to {} recovered", self.target);
                    failing = false;
                }
                Ok(()) => {}
                Err(e) if !failing => {
                    log::warn!("beacon to {} failed: {}", self.target, e);
                    failing = true;
                }
                Err(_) => {}
            }
            sleep_while(running, self.interval);
        }
    }
}

/// Client side: wait up to `timeout` for a beacon on `port`
///
/// Returns the beacon's source IP, or `None` on timeout.
pub fn listen_for_beacon(port: u16, timeout: Duration) -> io::Result<Option<IpAddr>> {
    let socket = bind_shared_udp(port)?;
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 64];

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        socket.set_read_timeout(Some(deadline - now))?;

        match socket.recv_from(&mut buf) {
            Ok((n, src)) if &buf[..n] == BEACON_MARKER => {
                log::debug!("beacon from {}", src);
                return Ok(Some(src.ip()));
            }
            Ok((n, src)) => {
                log::debug!("ignoring {}-byte datagram from {} on discovery port", n, src);
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(None)
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// UDP socket on `0.0.0.0:port` that other processes on this host can share
#[cfg(unix)]
fn bind_shared_udp(port: u16) -> io::Result<UdpSocket> {
    use std::os::unix::io::FromRawFd;

    // SAFETY: plain socket(2); the fd is owned by `socket` right after
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let socket = unsafe { UdpSocket::from_raw_fd(fd) };

    let one: libc::c_int = 1;
    for opt in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
        // SAFETY: fd is open and `one` outlives the call
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    // SAFETY: all-zero is a valid sockaddr_in; the fields we need are set below
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = u32::from(Ipv4Addr::UNSPECIFIED).to_be();

    // SAFETY: addr is a properly sized sockaddr_in
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(socket)
}

#[cfg(not(unix))]
fn bind_shared_udp(port: u16) -> io::Result<UdpSocket> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
}
