//! Core building blocks shared by the broker and the tools
//!
//! - `RingBuffer`: lock-free SPSC queue, the broker's monitor tap
//! - `ThroughputMeter`: running messages/second
//! - `journal`: flat envelope log and its replay

pub mod journal;
mod ring_buffer;
mod throughput;

pub use journal::{replay, JournalReader, JournalWriter, ReplayStats};
pub use ring_buffer::RingBuffer;
pub use throughput::ThroughputMeter;
