//! Error types for groundbus
//!
//! Codec errors are local and recoverable: a bad outgoing command is rejected,
//! the process carries on. Schema errors only occur while building the static
//! tables at startup. Bus errors cover I/O and address resolution.

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised while decoding or encoding a hardware frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// The cursor was asked for more bits than remain in the frame
    #[error("bit cursor underflow: requested {requested} bits, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },

    #[error("value {value} too large for {bits}-bit unsigned field `{field}`")]
    TooLargeUnsigned { field: String, value: i128, bits: u32 },

    #[error("negative value {value} for unsigned field `{field}`")]
    NegativeUnsigned { field: String, value: i128 },

    #[error("value {value} too large for {bits}-bit signed field `{field}`")]
    TooLargeSigned { field: String, value: i128, bits: u32 },

    #[error("value {value} too small for {bits}-bit signed field `{field}`")]
    TooSmallSigned { field: String, value: i128, bits: u32 },

    #[error("non-finite value for numeric field `{field}`")]
    NotFinite { field: String },

    #[error("symbol `{symbol}` is not defined for enum field `{field}`")]
    UnknownSymbol { field: String, symbol: String },

    #[error("string of {len} bytes exceeds the {max}-byte field `{field}`")]
    AsciiTooLong { field: String, len: usize, max: usize },

    #[error("string for field `{field}` contains non-ASCII characters")]
    NonAscii { field: String },

    #[error("record has no value for field `{0}`")]
    MissingField(String),

    #[error("field `{field}` expects {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("message type `{0}` is not registered")]
    UnknownMessageType(String),

    #[error("malformed frame line: {0}")]
    MalformedLine(String),
}

/// Errors in a static schema table, detected when the registry is built
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("field `{field}` has zero width")]
    ZeroWidth { field: String },

    #[error("numeric field `{field}` has a zero scale")]
    ZeroScale { field: String },

    #[error("field `{field}` is {bits} bits wide, the maximum is 64")]
    TooWide { field: String, bits: u32 },

    #[error("enum field `{field}`: value {value} does not fit in {bits} bits")]
    EnumValueOutOfRange { field: String, value: u64, bits: u32 },

    #[error("enum field `{field}`: duplicate entry `{entry}`")]
    DuplicateEnumEntry { field: String, entry: String },

    #[error("ascii field `{field}` is {bits} bits, not a whole number of bytes")]
    UnalignedAscii { field: String, bits: u32 },

    #[error("switch `{field}`: variant `{variant}` is not a symbol of the discriminant")]
    UnknownVariant { field: String, variant: String },

    #[error("message `{message}` lays out {bits} bits, not a whole number of bytes")]
    UnalignedFrame { message: String, bits: usize },

    #[error("message `{message}` lays out {bits} bits, frames carry at most {max}")]
    FrameTooLong { message: String, bits: usize, max: usize },

    #[error("message type id {0:#x} does not fit the 9-bit routing field")]
    MessageIdOutOfRange(u16),

    #[error("message type {0} registered twice")]
    DuplicateMessage(String),
}

/// Bus-level errors: sockets, discovery and configuration
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no discovery beacon received within {timeout_ms} ms and no fallback address configured")]
    DiscoveryFailed { timeout_ms: u64 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame of {size} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("envelope serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<rmp_serde::encode::Error> for BusError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BusError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}
