//! Field variants of the hardware frame codec
//!
//! A `Field` is a name plus one of four closed kinds. Each kind knows its own
//! width and how to move a value across a `BitCursor` (decode) or a
//! `BitWriter` (encode). Decoded values land in a `Record`, which keeps the
//! wire order of the fields.

use super::bit_cursor::{BitCursor, BitWriter};
use super::schema::Schema;
use crate::error::{CodecError, SchemaError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Rational scale applied to a numeric field: `physical = raw * num / den`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub num: i64,
    pub den: i64,
}

impl Scale {
    pub const ONE: Scale = Scale { num: 1, den: 1 };

    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    #[inline]
    pub fn is_one(&self) -> bool {
        self.num == self.den
    }

    #[inline]
    fn apply(&self, raw: i128) -> f64 {
        raw as f64 * self.num as f64 / self.den as f64
    }

    #[inline]
    fn invert(&self, physical: f64) -> f64 {
        physical * self.den as f64 / self.num as f64
    }
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unscaled integer (wide enough for any 64-bit field, signed or not)
    Int(i128),
    /// Scaled numeric
    Float(f64),
    /// Enum value with a table entry
    Symbol(String),
    /// Enum value the table does not know; re-encodes to the same raw bits
    Unmapped(u64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form used when decoded frames are published on the bus
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Int(v) => {
                if let Ok(small) = i64::try_from(*v) {
                    Json::from(small)
                } else if let Ok(big) = u64::try_from(*v) {
                    Json::from(big)
                } else {
                    Json::from(*v as f64)
                }
            }
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Symbol(s) | Value::Text(s) => Json::String(s.clone()),
            Value::Unmapped(raw) => serde_json::json!({ "unmapped": raw }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Symbol(s) => f.write_str(s),
            Value::Unmapped(raw) => write!(f, "<unmapped {}>", raw),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Field values in wire order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, replacing an earlier value of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    fn require(&self, name: &str) -> Result<&Value, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Bidirectional integer/symbol table, built once and shared between fields
#[derive(Debug, Clone)]
pub struct EnumTable {
    name: String,
    by_value: BTreeMap<u64, String>,
    by_symbol: HashMap<String, u64>,
}

impl EnumTable {
    pub fn new(name: &str, entries: &[(&str, u64)]) -> Result<Self, SchemaError> {
        let mut by_value = BTreeMap::new();
        let mut by_symbol = HashMap::new();

        for &(symbol, value) in entries {
            if by_symbol.insert(symbol.to_string(), value).is_some() {
                return Err(SchemaError::DuplicateEnumEntry {
                    field: name.to_string(),
                    entry: symbol.to_string(),
                });
            }
            if by_value.insert(value, symbol.to_string()).is_some() {
                return Err(SchemaError::DuplicateEnumEntry {
                    field: name.to_string(),
                    entry: value.to_string(),
                });
            }
        }

        Ok(Self {
            name: name.to_string(),
            by_value,
            by_symbol,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self, value: u64) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn value(&self, symbol: &str) -> Option<u64> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.by_value.values().map(String::as_str)
    }

    /// Largest mapped value, if any
    pub fn max_value(&self) -> Option<u64> {
        self.by_value.keys().next_back().copied()
    }
}

/// Integer field with optional sign and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Numeric {
    pub bits: u32,
    pub scale: Scale,
    pub signed: bool,
}

impl Numeric {
    fn decode(&self, cursor: &mut BitCursor<'_>) -> Result<Value, CodecError> {
        let raw = cursor.take_uint(self.bits as usize)?;
        let sign_bit = self.bits > 0 && (raw >> (self.bits - 1)) & 1 == 1;
        let n = if self.signed && sign_bit {
            raw as i128 - (1i128 << self.bits)
        } else {
            raw as i128
        };

        Ok(if self.scale.is_one() {
            Value::Int(n)
        } else {
            Value::Float(self.scale.apply(n))
        })
    }

    fn encode(&self, name: &str, value: &Value, writer: &mut BitWriter) -> Result<(), CodecError> {
        let n = match value {
            Value::Int(v) if self.scale.is_one() => *v,
            Value::Int(v) => self.scale.invert(*v as f64).round() as i128,
            Value::Float(v) => {
                if !v.is_finite() {
                    return Err(CodecError::NotFinite {
                        field: name.to_string(),
                    });
                }
                self.scale.invert(*v).round() as i128
            }
            _ => {
                return Err(CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: "a number",
                })
            }
        };

        let raw = self.check_range(name, n)?;
        writer.put_uint(raw, self.bits as usize);
        Ok(())
    }

    /// Two's complement bit pattern of `n`, if it fits
    fn check_range(&self, name: &str, n: i128) -> Result<u64, CodecError> {
        let bits = self.bits;
        if self.signed {
            // a zero-width field holds only 0
            let half = if bits == 0 { 0 } else { 1i128 << (bits - 1) };
            let max = (half - 1).max(0);
            let min = -half;
            if n > max {
                return Err(CodecError::TooLargeSigned {
                    field: name.to_string(),
                    value: n,
                    bits,
                });
            }
            if n < min {
                return Err(CodecError::TooSmallSigned {
                    field: name.to_string(),
                    value: n,
                    bits,
                });
            }
            let wrapped = if n < 0 { n + (1i128 << bits) } else { n };
            Ok(wrapped as u64)
        } else {
            if n < 0 {
                return Err(CodecError::NegativeUnsigned {
                    field: name.to_string(),
                    value: n,
                });
            }
            if n >= 1i128 << bits {
                return Err(CodecError::TooLargeUnsigned {
                    field: name.to_string(),
                    value: n,
                    bits,
                });
            }
            Ok(n as u64)
        }
    }
}

/// Integer field rendered through an `EnumTable`
#[derive(Debug, Clone)]
pub struct EnumField {
    pub bits: u32,
    pub table: Arc<EnumTable>,
}

impl EnumField {
    fn checked(name: &str, bits: u32, table: Arc<EnumTable>) -> Result<Self, SchemaError> {
        if let Some(max) = table.max_value() {
            if bits < 64 && max >> bits != 0 {
                return Err(SchemaError::EnumValueOutOfRange {
                    field: name.to_string(),
                    value: max,
                    bits,
                });
            }
        }
        Ok(Self { bits, table })
    }

    fn decode(&self, cursor: &mut BitCursor<'_>) -> Result<Value, CodecError> {
        let raw = cursor.take_uint(self.bits as usize)?;
        Ok(match self.table.symbol(raw) {
            Some(symbol) => Value::Symbol(symbol.to_string()),
            None => Value::Unmapped(raw),
        })
    }

    fn encode(&self, name: &str, value: &Value, writer: &mut BitWriter) -> Result<(), CodecError> {
        let raw = match value {
            Value::Symbol(symbol) | Value::Text(symbol) => {
                self.table
                    .value(symbol)
                    .ok_or_else(|| CodecError::UnknownSymbol {
                        field: name.to_string(),
                        symbol: symbol.clone(),
                    })?
            }
            Value::Unmapped(raw) => *raw,
            Value::Int(raw) if *raw >= 0 => *raw as u64,
            Value::Int(raw) => {
                return Err(CodecError::NegativeUnsigned {
                    field: name.to_string(),
                    value: *raw,
                })
            }
            Value::Float(_) => {
                return Err(CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: "an enum symbol",
                })
            }
        };

        if self.bits < 64 && raw >> self.bits != 0 {
            return Err(CodecError::TooLargeUnsigned {
                field: name.to_string(),
                value: raw as i128,
                bits: self.bits,
            });
        }
        writer.put_uint(raw, self.bits as usize);
        Ok(())
    }
}

/// Fixed-width, NUL-padded 7-bit text
#[derive(Debug, Clone, PartialEq)]
pub struct Ascii {
    pub bits: u32,
}

impl Ascii {
    fn decode(&self, cursor: &mut BitCursor<'_>) -> Result<Value, CodecError> {
        let bytes = cursor.take(self.bits as usize)?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = bytes[..end].iter().map(|&b| (b & 0x7F) as char).collect();
        Ok(Value::Text(text))
    }

    fn encode(&self, name: &str, value: &Value, writer: &mut BitWriter) -> Result<(), CodecError> {
        let text = match value {
            Value::Text(s) | Value::Symbol(s) => s,
            _ => {
                return Err(CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: "a string",
                })
            }
        };
        if !text.is_ascii() {
            return Err(CodecError::NonAscii {
                field: name.to_string(),
            });
        }

        let max = self.bits as usize / 8;
        if text.len() > max {
            return Err(CodecError::AsciiTooLong {
                field: name.to_string(),
                len: text.len(),
                max,
            });
        }

        let mut padded = text.as_bytes().to_vec();
        padded.resize(max, 0);
        writer.put(&padded, self.bits as usize);
        Ok(())
    }
}

/// Discriminated sub-format: an enum discriminant selects a nested schema
#[derive(Debug, Clone)]
pub struct Switch {
    pub discriminant: EnumField,
    pub variants: BTreeMap<String, Schema>,
}

/// Whether decoding may carry on after a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The layout of the remaining bits is unknown
    Halt,
}

/// The closed set of field kinds
#[derive(Debug, Clone)]
pub enum FieldKind {
    Numeric(Numeric),
    Enum(EnumField),
    Ascii(Ascii),
    Switch(Switch),
}

/// One named unit of a frame layout
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
}

impl Field {
    /// Unsigned, unscaled integer
    pub fn numeric(name: &str, bits: u32) -> Self {
        Self::scaled(name, bits, false, Scale::ONE)
    }

    /// Two's complement, unscaled integer
    pub fn signed(name: &str, bits: u32) -> Self {
        Self::scaled(name, bits, true, Scale::ONE)
    }

    pub fn scaled(name: &str, bits: u32, signed: bool, scale: Scale) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Numeric(Numeric {
                bits,
                scale,
                signed,
            }),
        }
    }

    /// Enum field; every mapped value must fit in `bits`
    pub fn enumeration(name: &str, bits: u32, table: Arc<EnumTable>) -> Result<Self, SchemaError> {
        Ok(Self {
            name: name.to_string(),
            kind: FieldKind::Enum(EnumField::checked(name, bits, table)?),
        })
    }

    pub fn ascii(name: &str, bits: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Ascii(Ascii { bits }),
        }
    }

    /// Switch on an enum discriminant named `name`
    ///
    /// Variant keys must be symbols of `table`. Symbols without a variant are
    /// legal and carry no further fields.
    pub fn switch(
        name: &str,
        bits: u32,
        table: Arc<EnumTable>,
        variants: Vec<(&str, Schema)>,
    ) -> Result<Self, SchemaError> {
        let discriminant = EnumField::checked(name, bits, table)?;

        let mut map = BTreeMap::new();
        for (symbol, schema) in variants {
            if discriminant.table.value(symbol).is_none() {
                return Err(SchemaError::UnknownVariant {
                    field: name.to_string(),
                    variant: symbol.to_string(),
                });
            }
            map.insert(symbol.to_string(), schema);
        }

        Ok(Self {
            name: name.to_string(),
            kind: FieldKind::Switch(Switch {
                discriminant,
                variants: map,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Width checks that do not depend on the surrounding message
    pub fn validate(&self) -> Result<(), SchemaError> {
        let bits = match &self.kind {
            FieldKind::Numeric(n) => {
                if n.scale.num == 0 || n.scale.den == 0 {
                    return Err(SchemaError::ZeroScale {
                        field: self.name.clone(),
                    });
                }
                n.bits
            }
            FieldKind::Enum(e) => e.bits,
            FieldKind::Ascii(a) => {
                if a.bits % 8 != 0 {
                    return Err(SchemaError::UnalignedAscii {
                        field: self.name.clone(),
                        bits: a.bits,
                    });
                }
                a.bits
            }
            FieldKind::Switch(s) => {
                for schema in s.variants.values() {
                    for field in schema.fields() {
                        field.validate()?;
                    }
                }
                s.discriminant.bits
            }
        };

        if bits == 0 {
            return Err(SchemaError::ZeroWidth {
                field: self.name.clone(),
            });
        }
        if bits > 64 && !matches!(self.kind, FieldKind::Ascii(_)) {
            return Err(SchemaError::TooWide {
                field: self.name.clone(),
                bits,
            });
        }
        Ok(())
    }

    /// Every total width this field can occupy on the wire
    pub fn bit_layouts(&self) -> Vec<usize> {
        match &self.kind {
            FieldKind::Numeric(n) => vec![n.bits as usize],
            FieldKind::Enum(e) => vec![e.bits as usize],
            FieldKind::Ascii(a) => vec![a.bits as usize],
            FieldKind::Switch(s) => {
                let head = s.discriminant.bits as usize;
                let mut widths: Vec<usize> = s
                    .variants
                    .values()
                    .flat_map(|schema| schema.bit_layouts())
                    .map(|w| head + w)
                    .collect();
                if s
                    .discriminant
                    .table
                    .symbols()
                    .any(|sym| !s.variants.contains_key(sym))
                {
                    widths.push(head);
                }
                widths.sort_unstable();
                widths.dedup();
                widths
            }
        }
    }

    pub(crate) fn decode_into(
        &self,
        cursor: &mut BitCursor<'_>,
        record: &mut Record,
    ) -> Result<Flow, CodecError> {
        match &self.kind {
            FieldKind::Numeric(n) => record.insert(self.name.as_str(), n.decode(cursor)?),
            FieldKind::Enum(e) => record.insert(self.name.as_str(), e.decode(cursor)?),
            FieldKind::Ascii(a) => record.insert(self.name.as_str(), a.decode(cursor)?),
            FieldKind::Switch(s) => {
                let tag = s.discriminant.decode(cursor)?;
                let variant = match &tag {
                    Value::Symbol(symbol) => s.variants.get(symbol),
                    _ => None,
                };
                let unmapped = matches!(tag, Value::Unmapped(_));
                record.insert(self.name.as_str(), tag);

                if unmapped {
                    return Ok(Flow::Halt);
                }
                if let Some(schema) = variant {
                    return schema.decode_into(cursor, record);
                }
            }
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn encode_from(
        &self,
        record: &Record,
        writer: &mut BitWriter,
    ) -> Result<Flow, CodecError> {
        let value = record.require(&self.name)?;
        match &self.kind {
            FieldKind::Numeric(n) => n.encode(&self.name, value, writer)?,
            FieldKind::Enum(e) => e.encode(&self.name, value, writer)?,
            FieldKind::Ascii(a) => a.encode(&self.name, value, writer)?,
            FieldKind::Switch(s) => {
                s.discriminant.encode(&self.name, value, writer)?;
                match value {
                    Value::Unmapped(_) => return Ok(Flow::Halt),
                    Value::Symbol(symbol) | Value::Text(symbol) => {
                        if let Some(schema) = s.variants.get(symbol) {
                            return schema.encode_into(record, writer);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(field: &Field, data: &[u8]) -> Result<Value, CodecError> {
        let mut cursor = BitCursor::new(data);
        let mut record = Record::new();
        field.decode_into(&mut cursor, &mut record)?;
        Ok(record.get(field.name()).cloned().unwrap())
    }

    fn encode_one(field: &Field, value: Value) -> Result<Vec<u8>, CodecError> {
        let record = Record::new().with(field.name(), value);
        let mut writer = BitWriter::new();
        field.encode_from(&record, &mut writer)?;
        Ok(writer.into_bytes())
    }

    fn states() -> Arc<EnumTable> {
        Arc::new(EnumTable::new("state", &[("CLOSED", 0), ("OPEN", 1), ("FAULT", 3)]).unwrap())
    }

    #[test]
    fn test_signed_numeric_with_scale() {
        let temp = Field::scaled("temperature", 24, true, Scale::new(1, 1024));

        // -2.5 degrees is -2560 raw
        let raw = (-2560i32 as u32 & 0xFF_FFFF).to_be_bytes();
        assert_eq!(decode_one(&temp, &raw[1..]).unwrap(), Value::Float(-2.5));
        assert_eq!(encode_one(&temp, Value::Float(-2.5)).unwrap(), raw[1..].to_vec());
    }

    #[test]
    fn test_encode_rounds_to_nearest() {
        let field = Field::scaled("pressure", 8, false, Scale::new(1, 4));
        // 10.1 / 0.25 = 40.4 -> 40
        assert_eq!(encode_one(&field, Value::Float(10.1)).unwrap(), vec![40]);
        assert_eq!(decode_one(&field, &[40]).unwrap(), Value::Float(10.0));
    }

    #[test]
    fn test_numeric_range_errors() {
        let unsigned = Field::numeric("count", 4);
        assert!(matches!(
            encode_one(&unsigned, Value::Int(16)),
            Err(CodecError::TooLargeUnsigned { bits: 4, .. })
        ));
        assert!(matches!(
            encode_one(&unsigned, Value::Int(-1)),
            Err(CodecError::NegativeUnsigned { .. })
        ));
        assert_eq!(encode_one(&unsigned, Value::Int(15)).unwrap(), vec![0xF0]);

        let signed = Field::signed("delta", 8);
        assert!(matches!(
            encode_one(&signed, Value::Int(128)),
            Err(CodecError::TooLargeSigned { .. })
        ));
        assert!(matches!(
            encode_one(&signed, Value::Int(-129)),
            Err(CodecError::TooSmallSigned { .. })
        ));
        assert_eq!(encode_one(&signed, Value::Int(-128)).unwrap(), vec![0x80]);
        assert!(matches!(
            encode_one(&signed, Value::Float(f64::NAN)),
            Err(CodecError::NotFinite { .. })
        ));
    }

    #[test]
    fn test_zero_width_signed_holds_only_zero() {
        let empty = Field::signed("reserved", 0);
        assert_eq!(encode_one(&empty, Value::Int(0)).unwrap(), Vec::<u8>::new());
        assert_eq!(decode_one(&empty, &[]).unwrap(), Value::Int(0));
        assert!(matches!(
            encode_one(&empty, Value::Int(1)),
            Err(CodecError::TooLargeSigned { bits: 0, .. })
        ));
        assert!(matches!(
            encode_one(&empty, Value::Int(-1)),
            Err(CodecError::TooSmallSigned { bits: 0, .. })
        ));
        assert!(matches!(
            empty.validate(),
            Err(SchemaError::ZeroWidth { .. })
        ));
    }

    #[test]
    fn test_full_width_unsigned() {
        let field = Field::numeric("serial", 64);
        let value = decode_one(&field, &[0xFF; 8]).unwrap();
        assert_eq!(value, Value::Int(u64::MAX as i128));
        assert_eq!(value.to_json(), serde_json::json!(u64::MAX));
    }

    #[test]
    fn test_enum_table_rejects_duplicates() {
        assert!(matches!(
            EnumTable::new("dup", &[("A", 0), ("A", 1)]),
            Err(SchemaError::DuplicateEnumEntry { .. })
        ));
        assert!(matches!(
            EnumTable::new("dup", &[("A", 0), ("B", 0)]),
            Err(SchemaError::DuplicateEnumEntry { .. })
        ));
    }

    #[test]
    fn test_enum_value_must_fit_width() {
        let err = Field::enumeration("state", 1, states()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::EnumValueOutOfRange {
                field: "state".into(),
                value: 3,
                bits: 1
            }
        );
    }

    #[test]
    fn test_unmapped_enum_value_survives() {
        let field = Field::enumeration("state", 2, states()).unwrap();
        assert_eq!(decode_one(&field, &[0b0100_0000]).unwrap(), Value::Symbol("OPEN".into()));

        let unmapped = decode_one(&field, &[0b1000_0000]).unwrap();
        assert_eq!(unmapped, Value::Unmapped(2));
        assert_eq!(encode_one(&field, unmapped).unwrap(), vec![0b1000_0000]);

        assert!(matches!(
            encode_one(&field, Value::Symbol("HALF".into())),
            Err(CodecError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_ascii_strips_padding_and_validates() {
        let field = Field::ascii("label", 40);
        assert_eq!(
            decode_one(&field, b"ok\0\0\0").unwrap(),
            Value::Text("ok".into())
        );
        assert_eq!(
            encode_one(&field, Value::Text("ok".into())).unwrap(),
            b"ok\0\0\0".to_vec()
        );
        assert!(matches!(
            encode_one(&field, Value::Text("toolong".into())),
            Err(CodecError::AsciiTooLong { len: 7, max: 5, .. })
        ));
        assert!(matches!(
            encode_one(&field, Value::Text("héllo".into())),
            Err(CodecError::NonAscii { .. })
        ));
    }

    #[test]
    fn test_switch_rejects_unknown_variant() {
        let err = Field::switch("state", 2, states(), vec![("HALF", Schema::default())]).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownVariant { .. }));
    }

    #[test]
    fn test_switch_layouts() {
        let field = Field::switch(
            "state",
            2,
            states(),
            vec![("FAULT", Schema::new(vec![Field::numeric("code", 6)]))],
        )
        .unwrap();
        // CLOSED/OPEN carry nothing, FAULT carries 6 more bits
        assert_eq!(field.bit_layouts(), vec![2, 8]);
    }

    #[test]
    fn test_validate_widths() {
        assert!(matches!(
            Field::numeric("nothing", 0).validate(),
            Err(SchemaError::ZeroWidth { .. })
        ));
        assert!(matches!(
            Field::numeric("huge", 65).validate(),
            Err(SchemaError::TooWide { bits: 65, .. })
        ));
        assert!(matches!(
            Field::ascii("odd", 12).validate(),
            Err(SchemaError::UnalignedAscii { .. })
        ));
        assert!(matches!(
            Field::scaled("broken", 8, false, Scale::new(1, 0)).validate(),
            Err(SchemaError::ZeroScale { .. })
        ));
        assert!(Field::ascii("long_text", 96).validate().is_ok());
    }

    #[test]
    fn test_record_keeps_wire_order() {
        let mut record = Record::new().with("b", Value::Int(1)).with("a", Value::Int(2));
        record.insert("b", Value::Int(3));
        let names: Vec<&str> = record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(record.get("b"), Some(&Value::Int(3)));
        assert_eq!(record.to_json(), serde_json::json!({"b": 3, "a": 2}));
    }
}
