//! Text renditions of hardware frames
//!
//! Boards and loggers print frames as text lines. Both formats carry the raw
//! routing id and the payload bytes in hex:
//!
//! - USB debug: `$SID:b0,b1,...`, possibly preceded by spaces or NULs
//! - Logger: `<seq> <SID> <dlc> <b0> <b1> ... <recv_time>`

use super::schema::{DecodedFrame, SchemaRegistry};
use crate::error::CodecError;
use std::fmt::Write;

/// Raw frame as read from a text line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u32,
    pub payload: Vec<u8>,
}

/// Which text format a line source speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    Usb,
    Logger,
}

impl LineFormat {
    /// `Ok(None)` for lines that carry no frame
    pub fn parse(self, line: &str) -> Result<Option<RawFrame>, CodecError> {
        match self {
            LineFormat::Usb => parse_usb_debug(line),
            LineFormat::Logger => parse_logger(line),
        }
    }
}

fn hex(token: &str, line: &str) -> Result<u64, CodecError> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16)
        .map_err(|_| CodecError::MalformedLine(format!("`{}` is not hex in {:?}", token, line)))
}

fn byte(token: &str, line: &str) -> Result<u8, CodecError> {
    let value = hex(token.trim(), line)?;
    u8::try_from(value)
        .map_err(|_| CodecError::MalformedLine(format!("`{}` is not a byte in {:?}", token, line)))
}

fn routing_id(token: &str, line: &str) -> Result<u32, CodecError> {
    let value = hex(token.trim(), line)?;
    u32::try_from(value)
        .map_err(|_| CodecError::MalformedLine(format!("id `{}` too large in {:?}", token, line)))
}

/// `$SID:hh,hh,...`. Lines not starting with `$` are board chatter.
pub fn parse_usb_debug(line: &str) -> Result<Option<RawFrame>, CodecError> {
    let line = line.trim_start_matches([' ', '\0']).trim_end();
    let Some(body) = line.strip_prefix('$') else {
        return Ok(None);
    };
    let (sid, data) = body
        .split_once(':')
        .ok_or_else(|| CodecError::MalformedLine(format!("no `:` in {:?}", line)))?;

    let payload = if data.trim().is_empty() {
        Vec::new()
    } else {
        data.split(',')
            .map(|token| byte(token, line))
            .collect::<Result<_, _>>()?
    };
    Ok(Some(RawFrame {
        id: routing_id(sid, line)?,
        payload,
    }))
}

/// Logger line; the trailing receive timestamp is not part of the payload
pub fn parse_logger(line: &str) -> Result<Option<RawFrame>, CodecError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }
    let [_, sid, _, rest @ ..] = tokens.as_slice() else {
        return Err(CodecError::MalformedLine(format!("too few fields in {:?}", line)));
    };
    let Some((_recv_time, data)) = rest.split_last() else {
        return Err(CodecError::MalformedLine(format!("no receive time in {:?}", line)));
    };

    Ok(Some(RawFrame {
        id: routing_id(sid, line)?,
        payload: data
            .iter()
            .map(|token| byte(token, line))
            .collect::<Result<_, _>>()?,
    }))
}

/// One-line console rendering, columns sized to the registry's names
#[derive(Debug, Clone)]
pub struct LineFormatter {
    type_width: usize,
    board_width: usize,
}

impl LineFormatter {
    pub fn new(registry: &SchemaRegistry) -> Self {
        Self {
            type_width: registry
                .message_types()
                .map(|m| m.name.len())
                .max()
                .unwrap_or(0),
            board_width: registry
                .board_types()
                .map(|(_, name)| name.len())
                .max()
                .unwrap_or(0),
        }
    }

    /// `[ SENSOR_TEMP  SENSOR ] time: 5 sensor_id: 2 temperature: -1.5`
    pub fn format(&self, frame: &DecodedFrame) -> String {
        let mut line = String::new();
        match frame {
            DecodedFrame::Known {
                id,
                message_type,
                board_type_name,
                fields,
            } => {
                let board = board_type_name
                    .clone()
                    .unwrap_or_else(|| format!("{:#04x}", id.board_type));
                let _ = write!(
                    line,
                    "[ {:<tw$} {:<bw$} ]",
                    message_type,
                    board,
                    tw = self.type_width,
                    bw = self.board_width
                );
                for (name, value) in fields.iter() {
                    let _ = write!(line, " {}: {}", name, value);
                }
            }
            DecodedFrame::Unknown { id, raw } => {
                let _ = write!(
                    line,
                    "[ {:<tw$} {:<bw$} ] unknown: {:?}",
                    format!("{:#05x}", id.message_type),
                    format!("{:#04x}", id.board_type),
                    raw,
                    tw = self.type_width,
                    bw = self.board_width
                );
            }
        }
        line
    }
}
