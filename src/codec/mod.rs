//! Bit-level codec for fixed-size hardware frames

pub mod bit_cursor;
pub mod field;
pub mod lines;
pub mod schema;
pub mod tables;

pub use bit_cursor::{BitCursor, BitWriter};
pub use field::{EnumTable, Field, FieldKind, Record, Scale, Value};
pub use lines::{parse_logger, parse_usb_debug, LineFormat, LineFormatter, RawFrame};
pub use schema::{DecodedFrame, MessageId, Priority, Schema, SchemaRegistry};
pub use tables::default_registry;
