//! Message layouts and routing-identifier dispatch
//!
//! A hardware frame is a 29-bit routing identifier plus up to 8 payload
//! bytes. The identifier packs four fixed bit ranges:
//!
//! ```text
//!  28 27 | 26 ........ 18 | 17 16 | 15 ..... 8 | 7 ....... 0
//! prio   | message type   | rsvd  | board type | board inst
//! ```
//!
//! `SchemaRegistry` maps the message type to a `Schema` and runs the field
//! codec over the payload. Unregistered types decode to
//! `DecodedFrame::Unknown` with the raw bytes.

use super::bit_cursor::{BitCursor, BitWriter};
use super::field::{Field, Flow, Record};
use crate::error::{CodecError, SchemaError};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Payload capacity of one hardware frame
pub const MAX_FRAME_BITS: usize = 64;

/// Largest message type id the routing field can carry
pub const MAX_MESSAGE_TYPE: u16 = 0x1FF;

const PRIORITY_SHIFT: u32 = 27;
const MESSAGE_TYPE_SHIFT: u32 = 18;
const BOARD_TYPE_SHIFT: u32 = 8;

/// Arbitration priority, bits 28:27
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Highest = 0b00,
    High = 0b01,
    Medium = 0b10,
    Low = 0b11,
}

impl Priority {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Priority::Highest,
            0b01 => Priority::High,
            0b10 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Highest => "HIGHEST",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unpacked routing identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub priority: Priority,
    pub message_type: u16,
    pub board_type: u8,
    pub board_instance: u8,
}

impl MessageId {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            priority: Priority::from_bits(raw >> PRIORITY_SHIFT),
            message_type: ((raw >> MESSAGE_TYPE_SHIFT) & MAX_MESSAGE_TYPE as u32) as u16,
            board_type: (raw >> BOARD_TYPE_SHIFT) as u8,
            board_instance: raw as u8,
        }
    }

    /// Packs back into 29 bits; reserved bits are zero
    pub fn to_raw(&self) -> u32 {
        (self.priority as u32) << PRIORITY_SHIFT
            | ((self.message_type & MAX_MESSAGE_TYPE) as u32) << MESSAGE_TYPE_SHIFT
            | (self.board_type as u32) << BOARD_TYPE_SHIFT
            | self.board_instance as u32
    }
}

/// Ordered field list of one message type
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Every total width a frame of this layout can have
    pub fn bit_layouts(&self) -> Vec<usize> {
        let mut totals = vec![0usize];
        for field in &self.fields {
            let widths = field.bit_layouts();
            let mut next: Vec<usize> = totals
                .iter()
                .flat_map(|t| widths.iter().map(move |w| t + w))
                .collect();
            next.sort_unstable();
            next.dedup();
            totals = next;
        }
        totals
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Record, CodecError> {
        let mut cursor = BitCursor::new(payload);
        let mut record = Record::new();
        self.decode_into(&mut cursor, &mut record)?;
        Ok(record)
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, CodecError> {
        let mut writer = BitWriter::new();
        self.encode_into(record, &mut writer)?;
        Ok(writer.into_bytes())
    }

    pub(crate) fn decode_into(
        &self,
        cursor: &mut BitCursor<'_>,
        record: &mut Record,
    ) -> Result<Flow, CodecError> {
        for field in &self.fields {
            if field.decode_into(cursor, record)? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn encode_into(
        &self,
        record: &Record,
        writer: &mut BitWriter,
    ) -> Result<Flow, CodecError> {
        for field in &self.fields {
            if field.encode_from(record, writer)? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Continue)
    }
}

/// A registered message type
#[derive(Debug, Clone)]
pub struct MessageType {
    pub id: u16,
    pub name: String,
    pub schema: Schema,
}

/// Result of decoding one hardware frame
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Known {
        id: MessageId,
        message_type: String,
        /// `None` when the board type has no name in the table
        board_type_name: Option<String>,
        fields: Record,
    },
    /// Message type not in the registry; payload kept verbatim
    Unknown { id: MessageId, raw: Vec<u8> },
}

impl DecodedFrame {
    pub fn id(&self) -> MessageId {
        match self {
            DecodedFrame::Known { id, .. } | DecodedFrame::Unknown { id, .. } => *id,
        }
    }

    /// Bus payload for a decoded frame
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            DecodedFrame::Known {
                id,
                message_type,
                board_type_name,
                fields,
            } => json!({
                "msg_type": message_type,
                "msg_prio": id.priority.as_str(),
                "board_type_id": board_type_name
                    .as_ref()
                    .map_or_else(|| json!(id.board_type), |name| json!(name)),
                "board_inst_id": id.board_instance,
                "data": fields.to_json(),
            }),
            DecodedFrame::Unknown { id, raw } => json!({
                "msg_type": id.message_type,
                "msg_prio": id.priority.as_str(),
                "board_type_id": id.board_type,
                "board_inst_id": id.board_instance,
                "data": { "unknown": raw },
            }),
        }
    }
}

/// Collects message types and board names, validated by `build`
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    messages: Vec<MessageType>,
    boards: Vec<(u8, String)>,
}

impl SchemaRegistryBuilder {
    pub fn message(mut self, id: u16, name: &str, schema: Schema) -> Self {
        self.messages.push(MessageType {
            id,
            name: name.to_string(),
            schema,
        });
        self
    }

    pub fn board_type(mut self, id: u8, name: &str) -> Self {
        self.boards.push((id, name.to_string()));
        self
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();

        for message in self.messages {
            if message.id > MAX_MESSAGE_TYPE {
                return Err(SchemaError::MessageIdOutOfRange(message.id));
            }
            for field in message.schema.fields() {
                field.validate()?;
            }
            for bits in message.schema.bit_layouts() {
                if bits % 8 != 0 {
                    return Err(SchemaError::UnalignedFrame {
                        message: message.name.clone(),
                        bits,
                    });
                }
                if bits > MAX_FRAME_BITS {
                    return Err(SchemaError::FrameTooLong {
                        message: message.name.clone(),
                        bits,
                        max: MAX_FRAME_BITS,
                    });
                }
            }

            if by_id.contains_key(&message.id) {
                return Err(SchemaError::DuplicateMessage(format!("{:#x}", message.id)));
            }
            if by_name.contains_key(&message.name) {
                return Err(SchemaError::DuplicateMessage(message.name));
            }
            let message = Arc::new(message);
            by_name.insert(message.name.clone(), Arc::clone(&message));
            by_id.insert(message.id, message);
        }

        let mut board_names = BTreeMap::new();
        let mut board_ids = HashMap::new();
        for (id, name) in self.boards {
            let taken = board_names.contains_key(&id) || board_ids.contains_key(&name);
            if taken {
                return Err(SchemaError::DuplicateEnumEntry {
                    field: "board_type".to_string(),
                    entry: name,
                });
            }
            board_ids.insert(name.clone(), id);
            board_names.insert(id, name);
        }

        Ok(SchemaRegistry {
            by_id,
            by_name,
            board_names,
            board_ids,
        })
    }
}

/// Routing identifier → schema table, immutable once built
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    by_id: HashMap<u16, Arc<MessageType>>,
    by_name: HashMap<String, Arc<MessageType>>,
    board_names: BTreeMap<u8, String>,
    board_ids: HashMap<String, u8>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn message_type(&self, name: &str) -> Option<&MessageType> {
        self.by_name.get(name).map(|m| m.as_ref())
    }

    pub fn message_type_by_id(&self, id: u16) -> Option<&MessageType> {
        self.by_id.get(&id).map(|m| m.as_ref())
    }

    /// Registered message types, in id order
    pub fn message_types(&self) -> impl Iterator<Item = &MessageType> {
        let mut types: Vec<&MessageType> = self.by_id.values().map(|m| m.as_ref()).collect();
        types.sort_by_key(|m| m.id);
        types.into_iter()
    }

    pub fn board_type_name(&self, id: u8) -> Option<&str> {
        self.board_names.get(&id).map(String::as_str)
    }

    /// Named board types, in id order
    pub fn board_types(&self) -> impl Iterator<Item = (u8, &str)> {
        self.board_names.iter().map(|(&id, name)| (id, name.as_str()))
    }

    pub fn board_type_id(&self, name: &str) -> Option<u8> {
        self.board_ids.get(name).copied()
    }

    /// Decode one frame. Only a payload shorter than its schema is an error.
    pub fn decode(&self, raw_id: u32, payload: &[u8]) -> Result<DecodedFrame, CodecError> {
        let id = MessageId::from_raw(raw_id);

        let Some(message) = self.by_id.get(&id.message_type) else {
            log::trace!("unregistered message type {:#x}", id.message_type);
            return Ok(DecodedFrame::Unknown {
                id,
                raw: payload.to_vec(),
            });
        };

        Ok(DecodedFrame::Known {
            id,
            message_type: message.name.clone(),
            board_type_name: self.board_type_name(id.board_type).map(str::to_string),
            fields: message.schema.decode(payload)?,
        })
    }

    /// Build `(raw_id, payload)` for an outgoing frame
    pub fn encode(
        &self,
        message_type: &str,
        board_type: &str,
        board_instance: u8,
        priority: Priority,
        record: &Record,
    ) -> Result<(u32, Vec<u8>), CodecError> {
        let message = self
            .by_name
            .get(message_type)
            .ok_or_else(|| CodecError::UnknownMessageType(message_type.to_string()))?;
        let board = self
            .board_type_id(board_type)
            .ok_or_else(|| CodecError::UnknownSymbol {
                field: "board_type".to_string(),
                symbol: board_type.to_string(),
            })?;

        let id = MessageId {
            priority,
            message_type: message.id,
            board_type: board,
            board_instance,
        };
        let payload = message.schema.encode(record)?;
        Ok((id.to_raw(), payload))
    }
}
