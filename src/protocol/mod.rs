//! Protocol layer: bus envelope and TCP stream framing
//!
//! - `Message` is the (channel, timestamp, payload) tuple carried by the bus
//! - Frames are length-prefixed multipart records, relayed by the broker
//!   without re-encoding

mod encoder;
mod message;

pub use encoder::{Decoder, Encoder, Frame, FrameKind, HEADER_SIZE, MAX_FRAME_SIZE};
pub use message::{now, Message, ENVELOPE_PARTS};
