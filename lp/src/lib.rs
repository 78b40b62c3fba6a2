//! logparse - pluggable log parsers
//!
//! Parsers turn raw bytes into rendered log messages for the logweave
//! session engine. Two formats ship with the crate:
//!
//! - plain text, one message per `\n` terminated line
//! - `LWR1` binary records: timestamped, tagged with ECU/app/context ids,
//!   optionally carrying file-transfer frames
//!
//! # Example
//!
//! ```ignore
//! use logparse::{ParserType, parse_buffer};
//!
//! let mut parser = ParserType::Text.build()?;
//! parse_buffer(parser.as_mut(), b"one\ntwo\n", true, |item| {
//!     println!("{:?}", item.message());
//! })?;
//! ```

pub mod attachment;
pub mod cli;
pub mod error;
pub mod parser;
pub mod record;
pub mod stats;
pub mod text;
pub mod timestamp;

pub use attachment::{Attachment, FileInfo, FileTransferCollector, TransferFrame, extract_files, scan_contained_files};
pub use error::{ParserError, ParserResult};
pub use parser::{LogMessage, ParseOutcome, ParseYield, Parser, ParserType, parse_buffer};
pub use record::{Level, Record, RecordKind, RecordParser, RecordParserOptions, RecordWriter};
pub use stats::{IdStats, RecordStats, collect_stats};
pub use text::TextParser;
pub use timestamp::TimestampFormat;

/// Separates rendered columns of a record message
pub const COLUMN_SENTINEL: char = '\u{0004}';
