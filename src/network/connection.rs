//! Buffered non-blocking connection
//!
//! Wraps any byte stream with a read buffer that frames are decoded from and
//! a bounded pending-write buffer. The broker uses it over mio streams, the
//! sender and receiver over std streams.

use std::io::{self, Read, Write};

use crate::error::Result;
use crate::protocol::{Decoder, Frame, MAX_FRAME_SIZE};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default cap on bytes waiting for a slow peer
pub const PENDING_WRITE_LIMIT: usize = 256 * 1024;

/// Kernel socket buffer size requested for bus sockets
pub const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

pub struct Connection<S> {
    stream: S,
    read_buffer: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    write_buffer: Vec<u8>,
    write_limit: usize,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self::with_write_limit(stream, PENDING_WRITE_LIMIT)
    }

    pub fn with_write_limit(stream: S, write_limit: usize) -> Self {
        Self {
            stream,
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
            read_pos: 0,
            read_len: 0,
            write_buffer: Vec::new(),
            write_limit,
        }
    }

    /// One read from the stream into the buffer
    ///
    /// Returns the number of bytes read, 0 if the stream had nothing (would
    /// block or timed out). End of stream is an `UnexpectedEof` error.
    pub fn fill_read_buffer(&mut self) -> io::Result<usize> {
        if self.read_pos > 0 {
            self.read_buffer.copy_within(self.read_pos..self.read_len, 0);
            self.read_len -= self.read_pos;
            self.read_pos = 0;
        }
        if self.read_len == self.read_buffer.len() {
            // a partial frame fills the buffer; frames are capped, so is growth
            let grown = (self.read_buffer.len() * 2).min(MAX_FRAME_SIZE);
            if grown == self.read_buffer.len() {
                return Ok(0);
            }
            self.read_buffer.resize(grown, 0);
        }

        match self.stream.read(&mut self.read_buffer[self.read_len..]) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => {
                self.read_len += n;
                Ok(n)
            }
            Err(ref e) if is_transient(e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Next complete frame already in the read buffer
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoder = Decoder::new(&self.read_buffer[self.read_pos..self.read_len]);
        let frame = decoder.next()?;
        let consumed = decoder.consumed();
        self.read_pos += consumed;
        Ok(frame)
    }

    /// Bytes read but not yet decoded
    #[inline(always)]
    pub fn buffered(&self) -> usize {
        self.read_len - self.read_pos
    }

    /// Queue `data` and push as much as the stream takes
    ///
    /// Returns `Ok(false)` without queuing anything when the pending buffer
    /// would exceed its limit.
    pub fn queue_write(&mut self, data: &[u8]) -> io::Result<bool> {
        self.flush_write_buffer()?;

        if self.write_buffer.len() + data.len() > self.write_limit {
            return Ok(false);
        }
        self.write_buffer.extend_from_slice(data);
        self.flush_write_buffer()?;
        Ok(true)
    }

    /// Write pending bytes until the stream would block
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if is_transient(e) => break,
                Err(e) => return Err(e),
            }
        }
        self.write_buffer.drain(..written);
        Ok(())
    }

    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Ask the kernel for larger send/receive buffers. Best effort.
#[cfg(unix)]
pub(crate) fn set_socket_buffers<F: std::os::unix::io::AsRawFd>(socket: &F, size: usize) {
    let fd = socket.as_raw_fd();
    let optval = size as libc::c_int;
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd is a live socket and optval outlives the call
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            log::debug!("setsockopt({}) failed: {}", opt, io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn set_socket_buffers<F>(_socket: &F, _size: usize) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Encoder, FrameKind, Message};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted stream: reads hand out queued chunks, writes accept a quota
    #[derive(Default)]
    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
        written: Vec<u8>,
        write_quota: usize,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_quota == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.write_quota);
            self.write_quota -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn publish_frame(channel: &str) -> Vec<u8> {
        let mut encoder = Encoder::new(256);
        encoder
            .encode_message(&Message::with_timestamp(channel, 1.0, json!({"v": 1})))
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_frames_split_across_reads() {
        let frame = publish_frame("foo");
        let mut stream = ScriptedStream::default();
        stream.chunks.push_back(frame[..5].to_vec());
        stream.chunks.push_back(frame[5..].to_vec());
        let mut conn = Connection::new(stream);

        assert_eq!(conn.fill_read_buffer().unwrap(), 5);
        assert!(conn.next_frame().unwrap().is_none());

        conn.fill_read_buffer().unwrap();
        let decoded = conn.next_frame().unwrap().unwrap();
        assert_eq!(decoded.kind(), FrameKind::Publish);
        assert_eq!(decoded.channel(), Some(&b"foo"[..]));
        assert_eq!(conn.buffered(), 0);

        // nothing more: not an error
        assert_eq!(conn.fill_read_buffer().unwrap(), 0);
    }

    #[test]
    fn test_large_frame_grows_buffer() {
        let mut encoder = Encoder::new(0);
        let big = vec![7u8; READ_BUFFER_SIZE * 3];
        let frame = encoder.encode(FrameKind::Subscribe, &[&big]).unwrap().to_vec();

        let mut stream = ScriptedStream::default();
        stream.chunks.push_back(frame);
        let mut conn = Connection::new(stream);

        let mut decoded = None;
        while decoded.is_none() {
            assert!(conn.fill_read_buffer().unwrap() > 0);
            decoded = conn.next_frame().unwrap();
        }
        assert_eq!(decoded.unwrap().part(0).unwrap().len(), big.len());
    }

    #[test]
    fn test_eof_is_an_error() {
        let stream = ScriptedStream {
            eof: true,
            ..Default::default()
        };
        let mut conn = Connection::new(stream);
        let err = conn.fill_read_buffer().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_slow_peer_drops_instead_of_growing() {
        let frame = publish_frame("slow");
        let stream = ScriptedStream {
            write_quota: frame.len() + 10,
            ..Default::default()
        };
        let mut conn = Connection::with_write_limit(stream, frame.len() * 2);

        assert!(conn.queue_write(&frame).unwrap());
        // partially written, rest pending
        assert!(conn.queue_write(&frame).unwrap());
        assert_eq!(conn.write_pending(), frame.len() - 10);

        assert!(conn.queue_write(&frame).unwrap());
        assert!(!conn.queue_write(&frame).unwrap());
        assert_eq!(conn.write_pending(), frame.len() * 2 - 10);

        conn.stream_mut().write_quota = usize::MAX;
        conn.flush_write_buffer().unwrap();
        assert_eq!(conn.write_pending(), 0);
        assert_eq!(conn.stream().written.len(), frame.len() * 3);
    }
}
