//! groundbus - telemetry data bus for ground-support networks
//!
//! Architecture:
//! - Broker: one process relays every publisher to every prefix-matching
//!   subscriber, best-effort and at-most-once
//! - Discovery: the broker broadcasts a UDP beacon; clients take its source
//!   address as the broker address
//! - Clients: `Sender` and `Receiver` resolve the broker through a shared
//!   `Communicator` and heal across broker restarts
//! - Codec: bit-level decoding of fixed-size hardware frames into records
//!
//! ```no_run
//! use groundbus::{BusConfig, Communicator, Receiver, Sender};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # fn main() -> groundbus::Result<()> {
//! let comm = Communicator::new(&BusConfig::default());
//! let mut sender = Sender::new(&comm, "DAQ")?;
//! let receiver = Receiver::new(&comm, &["DAQ"])?;
//!
//! sender.send(json!({"PT1": 14.7}))?;
//! if let Some(msg) = receiver.recv_message(Some(Duration::from_millis(500))) {
//!     println!("{} {}", msg.channel, msg.payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::{BrokerConfig, BusConfig, ClientConfig, FallbackPolicy, PortConfig};
pub use error::{BusError, CodecError, Result, SchemaError};
pub use network::{Broker, BrokerHandle, Communicator, LinkState, Receiver, Sender};
pub use protocol::Message;
