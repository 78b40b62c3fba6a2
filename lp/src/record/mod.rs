//! Binary record format
//!
//! Records are stored back to back. Each one starts with a fixed header:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "LWR1"
//! 4       8     timestamp, unix ms (u64 LE)
//! 12      4     ecu id (ASCII, NUL padded)
//! 16      4     app id
//! 20      4     context id
//! 24      1     level (1 fatal .. 6 verbose)
//! 25      1     kind (0 log, 1 transfer start, 2 transfer data, 3 transfer end)
//! 26      4     payload length (u32 LE)
//! 30      n     payload
//! ```

mod parser;

pub use parser::{RecordParser, RecordParserOptions};

use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::COLUMN_SENTINEL;
use crate::attachment::TransferFrame;
use crate::error::{ParserError, ParserResult};

pub const MAGIC: &[u8; 4] = b"LWR1";
pub const HEADER_LEN: usize = 30;
/// Upper bound for a single payload; anything larger is treated as corruption
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Log level of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Verbose = 6,
}

impl Level {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Level::Fatal),
            2 => Some(Level::Error),
            3 => Some(Level::Warn),
            4 => Some(Level::Info),
            5 => Some(Level::Debug),
            6 => Some(Level::Verbose),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Verbose => "VERBOSE",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload kind of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Log = 0,
    TransferStart = 1,
    TransferData = 2,
    TransferEnd = 3,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordKind::Log),
            1 => Some(RecordKind::TransferStart),
            2 => Some(RecordKind::TransferData),
            3 => Some(RecordKind::TransferEnd),
            _ => None,
        }
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: u64,
    pub ecu: String,
    pub app: String,
    pub context: String,
    pub level: Level,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

impl Record {
    /// Plain log record
    pub fn log(timestamp: u64, ecu: &str, app: &str, context: &str, level: Level, text: &str) -> Self {
        Self {
            timestamp,
            ecu: ecu.to_string(),
            app: app.to_string(),
            context: context.to_string(),
            level,
            kind: RecordKind::Log,
            payload: text.as_bytes().to_vec(),
        }
    }

    /// Record carrying a file transfer frame
    pub fn transfer(timestamp: u64, ecu: &str, app: &str, context: &str, frame: &TransferFrame) -> Self {
        let (kind, payload) = frame.encode();
        Self {
            timestamp,
            ecu: ecu.to_string(),
            app: app.to_string(),
            context: context.to_string(),
            level: Level::Info,
            kind,
            payload,
        }
    }

    /// Serialize into the on-disk layout
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&pad_id(&self.ecu));
        out.extend_from_slice(&pad_id(&self.app));
        out.extend_from_slice(&pad_id(&self.context));
        out.push(self.level as u8);
        out.push(self.kind as u8);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one record from the front of `input`
    ///
    /// Returns `Ok(None)` when the input is too short to hold the whole record.
    pub fn decode(input: &[u8]) -> ParserResult<Option<(Record, usize)>> {
        if input.len() < HEADER_LEN {
            return Ok(None);
        }
        if &input[0..4] != MAGIC {
            return Err(ParserError::Parse("missing record magic".to_string()));
        }
        let timestamp = u64::from_le_bytes(read_array(&input[4..12]));
        let ecu = read_id(&input[12..16]);
        let app = read_id(&input[16..20]);
        let context = read_id(&input[20..24]);
        let level = Level::from_u8(input[24]).ok_or_else(|| ParserError::Parse(format!("invalid level {}", input[24])))?;
        let kind =
            RecordKind::from_u8(input[25]).ok_or_else(|| ParserError::Parse(format!("invalid kind {}", input[25])))?;
        let len = u32::from_le_bytes(read_array(&input[26..30])) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(ParserError::Parse(format!("payload length {} exceeds limit", len)));
        }
        if input.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = input[HEADER_LEN..HEADER_LEN + len].to_vec();
        Ok(Some((
            Record {
                timestamp,
                ecu,
                app,
                context,
                level,
                kind,
                payload,
            },
            HEADER_LEN + len,
        )))
    }

    /// Render as columns joined by [`COLUMN_SENTINEL`]
    pub fn render(&self) -> String {
        let time = DateTime::<Utc>::from_timestamp_millis(self.timestamp as i64)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| self.timestamp.to_string());
        let body = match self.kind {
            RecordKind::Log => String::from_utf8_lossy(&self.payload).into_owned(),
            _ => match TransferFrame::decode(self.kind, &self.payload) {
                Ok(frame) => frame.describe(),
                Err(e) => format!("<broken transfer frame: {}>", e),
            },
        };
        let sentinel = COLUMN_SENTINEL.to_string();
        [
            time.as_str(),
            self.ecu.as_str(),
            self.app.as_str(),
            self.context.as_str(),
            self.level.as_str(),
            body.as_str(),
        ]
        .join(&sentinel)
    }
}

/// Writes records to any `Write` sink
pub struct RecordWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write(&mut self, record: &Record) -> ParserResult<()> {
        let bytes = record.encode();
        self.inner.write_all(&bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(mut self) -> ParserResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Position of the next record magic at or after `from`
pub fn find_magic(input: &[u8], from: usize) -> Option<usize> {
    if input.len() < MAGIC.len() {
        return None;
    }
    (from..=input.len() - MAGIC.len()).find(|i| &input[*i..*i + MAGIC.len()] == MAGIC)
}

fn pad_id(id: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (i, b) in id.bytes().take(4).enumerate() {
        out[i] = b;
    }
    out
}

fn read_id(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encoded_record() {
        let record = Record::log(1_700_000_000_000, "ECU1", "APP", "CTX", Level::Warn, "disk almost full");
        let bytes = record.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        let (decoded, consumed) = Record::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_short_input() {
        let record = Record::log(1, "E", "A", "C", Level::Info, "payload");
        let bytes = record.encode();
        assert!(Record::decode(&bytes[..HEADER_LEN - 1]).unwrap().is_none());
        assert!(Record::decode(&bytes[..bytes.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut bytes = Record::log(1, "E", "A", "C", Level::Info, "x").encode();
        bytes[0] = b'X';
        assert!(Record::decode(&bytes).is_err());
    }

    #[test]
    fn test_render_columns() {
        let record = Record::log(0, "ECU", "APP", "CTX", Level::Info, "hello");
        let rendered = record.render();
        let columns: Vec<&str> = rendered.split(COLUMN_SENTINEL).collect();
        assert_eq!(columns.len(), 6);
        assert_eq!(columns[0], "1970-01-01T00:00:00.000");
        assert_eq!(columns[1], "ECU");
        assert_eq!(columns[4], "INFO");
        assert_eq!(columns[5], "hello");
    }

    #[test]
    fn test_long_ids_truncated() {
        let record = Record::log(0, "TOOLONG", "A", "C", Level::Info, "x");
        let (decoded, _) = Record::decode(&record.encode()).unwrap().unwrap();
        assert_eq!(decoded.ecu, "TOOL");
    }

    #[test]
    fn test_find_magic() {
        let mut bytes = vec![0u8, 1, 2];
        bytes.extend(Record::log(0, "E", "A", "C", Level::Info, "x").encode());
        assert_eq!(find_magic(&bytes, 0), Some(3));
        assert_eq!(find_magic(&bytes, 4), None);
    }

    #[test]
    fn test_writer_counts_bytes() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write(&Record::log(0, "E", "A", "C", Level::Info, "abc")).unwrap();
        writer.write(&Record::log(0, "E", "A", "C", Level::Info, "de")).unwrap();
        assert_eq!(writer.written(), (HEADER_LEN * 2 + 5) as u64);
        assert_eq!(writer.into_inner().unwrap().len(), HEADER_LEN * 2 + 5);
    }
}
