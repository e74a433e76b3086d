//! Multipart stream framing
//!
//! Every frame on a bus TCP connection:
//!
//! ```text
//! ┌──────────────┬──────────┬────────────┬───────────────────────────────┐
//! │ len: u32 BE  │ kind: u8 │ parts: u8  │ parts × [u32 BE len][bytes]   │
//! └──────────────┴──────────┴────────────┴───────────────────────────────┘
//! ```
//!
//! `len` counts everything after itself. Frames above `MAX_FRAME_SIZE` are a
//! protocol violation.

use super::message::{Message, ENVELOPE_PARTS};
use crate::error::{BusError, Result};
use std::ops::Range;

/// Length prefix + kind + part count
pub const HEADER_SIZE: usize = 6;
pub const PART_HEADER_SIZE: usize = 4;
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Frame kinds on a bus connection
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Envelope from a sender, relayed to subscribers
    Publish = 1,
    /// Channel prefixes from a receiver, one per part
    Subscribe = 2,
    /// Broker keep-alive to subscribers, no parts
    Heartbeat = 4,
}

impl FrameKind {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Publish),
            2 => Some(Self::Subscribe),
            4 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// A decoded frame: the raw bytes plus where each part sits in them
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    kind: FrameKind,
    raw: Vec<u8>,
    parts: Vec<Range<usize>>,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, index: usize) -> Option<&[u8]> {
        self.parts.get(index).map(|r| &self.raw[r.clone()])
    }

    pub fn parts(&self) -> impl Iterator<Item = &[u8]> {
        self.parts.iter().map(|r| &self.raw[r.clone()])
    }

    /// Channel of a publish frame
    pub fn channel(&self) -> Option<&[u8]> {
        match self.kind {
            FrameKind::Publish => self.part(0),
            _ => None,
        }
    }

    /// The complete encoded frame, ready to forward verbatim
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn to_message(&self) -> Result<Message> {
        let parts: Vec<&[u8]> = self.parts().collect();
        Message::from_parts(&parts)
    }
}

/// Reusable frame encoder
///
/// Frames are appended to an internal buffer, which is cleared with `reset`.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Append one frame; returns the bytes of that frame
    pub fn encode<P: AsRef<[u8]>>(&mut self, kind: FrameKind, parts: &[P]) -> Result<&[u8]> {
        if parts.len() > u8::MAX as usize {
            return Err(BusError::MalformedFrame(format!(
                "{} parts, at most {} per frame",
                parts.len(),
                u8::MAX
            )));
        }

        let body: usize = 2 + parts
            .iter()
            .map(|p| PART_HEADER_SIZE + p.as_ref().len())
            .sum::<usize>();
        if body + 4 > MAX_FRAME_SIZE {
            return Err(BusError::FrameTooLarge {
                size: body + 4,
                max: MAX_FRAME_SIZE,
            });
        }

        let start = self.buffer.len();
        self.buffer.reserve(body + 4);
        self.buffer.extend_from_slice(&(body as u32).to_be_bytes());
        self.buffer.push(kind as u8);
        self.buffer.push(parts.len() as u8);
        for part in parts {
            let part = part.as_ref();
            self.buffer
                .extend_from_slice(&(part.len() as u32).to_be_bytes());
            self.buffer.extend_from_slice(part);
        }

        Ok(&self.buffer[start..])
    }

    pub fn encode_message(&mut self, msg: &Message) -> Result<&[u8]> {
        let parts = msg.to_parts()?;
        self.encode(FrameKind::Publish, &parts)
    }

    pub fn encode_subscribe<S: AsRef<str>>(&mut self, prefixes: &[S]) -> Result<&[u8]> {
        let parts: Vec<&[u8]> = prefixes.iter().map(|p| p.as_ref().as_bytes()).collect();
        self.encode(FrameKind::Subscribe, &parts)
    }

    pub fn encode_heartbeat(&mut self) -> Result<&[u8]> {
        self.encode::<&[u8]>(FrameKind::Heartbeat, &[])
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// Pulls complete frames out of a byte buffer
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> Decoder<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    /// Next complete frame, `Ok(None)` if the buffer ends mid-frame
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Frame>> {
        let available = &self.buffer[self.read_pos..];
        if available.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([available[0], available[1], available[2], available[3]]) as usize;
        if len + 4 > MAX_FRAME_SIZE {
            return Err(BusError::FrameTooLarge {
                size: len + 4,
                max: MAX_FRAME_SIZE,
            });
        }
        if len < 2 {
            return Err(BusError::MalformedFrame(format!("frame length {} too short", len)));
        }
        if available.len() < len + 4 {
            return Ok(None);
        }

        let raw = &available[..len + 4];
        let kind = FrameKind::from_u8(raw[4])
            .ok_or_else(|| BusError::MalformedFrame(format!("unknown frame kind {}", raw[4])))?;
        let count = raw[5] as usize;

        let mut parts = Vec::with_capacity(count);
        let mut pos = HEADER_SIZE;
        for _ in 0..count {
            if pos + PART_HEADER_SIZE > raw.len() {
                return Err(BusError::MalformedFrame("truncated part header".to_string()));
            }
            let part_len =
                u32::from_be_bytes([raw[pos], raw[pos + 1], raw[pos + 2], raw[pos + 3]]) as usize;
            pos += PART_HEADER_SIZE;
            if pos + part_len > raw.len() {
                return Err(BusError::MalformedFrame("part overruns frame".to_string()));
            }
            parts.push(pos..pos + part_len);
            pos += part_len;
        }
        if pos != raw.len() {
            return Err(BusError::MalformedFrame(format!(
                "{} trailing bytes in frame",
                raw.len() - pos
            )));
        }

        if kind == FrameKind::Publish && count != ENVELOPE_PARTS {
            return Err(BusError::MalformedFrame(format!(
                "publish frame with {} parts",
                count
            )));
        }

        self.read_pos += raw.len();
        Ok(Some(Frame {
            kind,
            raw: raw.to_vec(),
            parts,
        }))
    }

    /// Bytes consumed by the frames returned so far
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.read_pos)
    }
}
