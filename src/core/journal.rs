//! Flat envelope journal and replay
//!
//! A journal is a plain concatenation of MessagePack arrays
//! `[channel, timestamp, payload]`, one per message, with no header. Writers
//! append, so a recording can be resumed into the same file.

use crate::error::{BusError, Result};
use crate::protocol::Message;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Appends messages to a journal
pub struct JournalWriter<W: Write> {
    out: W,
    written: u64,
}

impl JournalWriter<BufWriter<File>> {
    /// Open `path` for appending, creating it if needed
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JournalWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn append(&mut self, msg: &Message) -> Result<()> {
        rmp_serde::encode::write(&mut self.out, &(&msg.channel, msg.timestamp, &msg.payload))?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Messages appended through this writer
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads messages back in recorded order
pub struct JournalReader<R: BufRead> {
    input: R,
    done: bool,
}

impl JournalReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path.as_ref())?)))
    }
}

impl<R: BufRead> JournalReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn read_entry(&mut self) -> Option<Result<Message>> {
        match self.input.fill_buf() {
            Ok([]) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e.into())),
        }

        let entry: std::result::Result<(String, f64, Value), _> =
            rmp_serde::from_read(&mut self.input);
        match entry {
            Ok((channel, timestamp, payload)) => {
                Some(Ok(Message::with_timestamp(channel, timestamp, payload)))
            }
            Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
            | Err(rmp_serde::decode::Error::InvalidDataRead(e))
                if e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                log::warn!("journal ends with a truncated entry");
                None
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl<R: BufRead> Iterator for JournalReader<R> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = self.read_entry();
        if !matches!(entry, Some(Ok(_))) {
            self.done = true;
        }
        entry
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Re-publish journaled messages at their recorded relative offsets
///
/// `speed` 2.0 plays twice as fast. Messages keep their recorded timestamp.
/// An entry whose offset cannot be scheduled (infinite, or past what an
/// `Instant` can hold) is published immediately.
/// `publish` returns whether the message reached the transport.
pub fn replay<I, F>(messages: I, speed: f64, mut publish: F) -> Result<ReplayStats>
where
    I: IntoIterator<Item = Result<Message>>,
    F: FnMut(&Message) -> Result<bool>,
{
    if !(speed.is_finite() && speed > 0.0) {
        return Err(BusError::Config(format!("replay speed must be positive, got {}", speed)));
    }

    let started = Instant::now();
    let mut first_ts = None;
    let mut stats = ReplayStats::default();

    for msg in messages {
        let msg = msg?;
        let origin = *first_ts.get_or_insert(msg.timestamp);

        let offset = ((msg.timestamp - origin) / speed).max(0.0);
        let due = Duration::try_from_secs_f64(offset)
            .ok()
            .and_then(|offset| started.checked_add(offset));
        match due {
            Some(due) => {
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
            }
            None => log::warn!(
                "cannot schedule entry at {} on {:?}, sending now",
                msg.timestamp,
                msg.channel
            ),
        }

        if publish(&msg)? {
            stats.delivered += 1;
        } else {
            stats.dropped += 1;
        }
    }

    Ok(stats)
}

/// Read a whole journal into memory
pub fn read_all<R: Read>(input: R) -> Result<Vec<Message>> {
    JournalReader::new(BufReader::new(input)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn sample() -> Vec<Message> {
        vec![
            Message::with_timestamp("DAQ", 100.0, json!({"data": {"PT1": [1.0, 2.0]}})),
            Message::with_timestamp("CAN/Parsley", 100.05, json!({"msg_type": "DEBUG_MSG"})),
            Message::with_timestamp("", 100.1, json!(null)),
        ]
    }

    #[test]
    fn test_entries_are_flat_msgpack_arrays() {
        let mut writer = JournalWriter::new(Vec::new());
        writer
            .append(&Message::with_timestamp("a", 1.0, json!(2)))
            .unwrap();
        let bytes = writer.into_inner();

        // fixarray(3), fixstr "a", float64 1.0, fixint 2
        assert_eq!(bytes[0], 0x93);
        assert_eq!(&bytes[1..3], &[0xa1, b'a']);
        assert_eq!(bytes[3], 0xcb);
        assert_eq!(*bytes.last().unwrap(), 0x02);
    }

    #[test]
    fn test_file_journal_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.journal");

        let messages = sample();
        {
            let mut writer = JournalWriter::create(&path).unwrap();
            writer.append(&messages[0]).unwrap();
            writer.flush().unwrap();
        }
        {
            let mut writer = JournalWriter::create(&path).unwrap();
            for msg in &messages[1..] {
                writer.append(msg).unwrap();
            }
            assert_eq!(writer.written(), 2);
            writer.flush().unwrap();
        }

        let read: Vec<Message> = JournalReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, messages);
    }

    #[test]
    fn test_truncated_tail_ends_cleanly() {
        let mut writer = JournalWriter::new(Vec::new());
        for msg in &sample() {
            writer.append(msg).unwrap();
        }
        let mut bytes = writer.into_inner();
        bytes.truncate(bytes.len() - 3);

        let read = read_all(Cursor::new(bytes)).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].channel, "CAN/Parsley");
    }

    #[test]
    fn test_garbage_is_an_error() {
        let mut reader = JournalReader::new(Cursor::new(vec![0xc1, 0x00]));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_replay_keeps_offsets_and_timestamps() {
        let messages = sample();
        let started = Instant::now();
        let mut seen = Vec::new();

        let stats = replay(messages.clone().into_iter().map(Ok), 2.0, |msg| {
            seen.push((started.elapsed(), msg.clone()));
            Ok(seen.len() != 2)
        })
        .unwrap();

        assert_eq!(stats, ReplayStats { delivered: 2, dropped: 1 });
        let sent: Vec<Message> = seen.iter().map(|(_, m)| m.clone()).collect();
        assert_eq!(sent, messages);
        // last message recorded 100 ms after the first, played at 2x
        assert!(seen[2].0 >= Duration::from_millis(50));
    }

    #[test]
    fn test_replay_rejects_bad_speed() {
        let empty: Vec<Result<Message>> = Vec::new();
        assert!(matches!(
            replay(empty, 0.0, |_| Ok(true)),
            Err(BusError::Config(_))
        ));
    }

    #[test]
    fn test_replay_sends_unschedulable_entries_at_once() {
        let messages = vec![
            Message::with_timestamp("DAQ", 0.0, json!(1)),
            Message::with_timestamp("DAQ", f64::INFINITY, json!(2)),
            Message::with_timestamp("DAQ", 1e300, json!(3)),
            Message::with_timestamp("DAQ", f64::NAN, json!(4)),
        ];
        let started = Instant::now();
        let mut seen = Vec::new();

        let stats = replay(messages.into_iter().map(Ok), 1.0, |msg| {
            seen.push(msg.payload.clone());
            Ok(true)
        })
        .unwrap();

        assert_eq!(stats.delivered, 4);
        assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4)]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
