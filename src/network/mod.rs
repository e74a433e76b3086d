//! Network layer: broker, discovery and the client endpoints
//!
//! - `Broker`: mio relay from the source port to prefix-filtered sinks
//! - `discovery`: UDP beacon and listener
//! - `Communicator`: broker address resolution and link state
//! - `Sender` / `Receiver`: the public publish/subscribe API

mod broker;
mod communicator;
mod connection;
pub mod discovery;
mod receiver;
mod sender;

pub use broker::{Broker, BrokerHandle, BrokerStats, StatsSnapshot, TapSample};
pub use communicator::{Communicator, LinkState};
pub use connection::{Connection, PENDING_WRITE_LIMIT};
pub use discovery::{listen_for_beacon, Beacon, BEACON_MARKER};
pub use receiver::Receiver;
pub use sender::Sender;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps in background threads
const SLEEP_STEP: Duration = Duration::from_millis(10);

/// Lock, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sleep up to `total`, waking early once `keep_going` turns false
pub(crate) fn sleep_while(keep_going: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while keep_going.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SLEEP_STEP));
    }
}
