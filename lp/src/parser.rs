//! Parser capability
//!
//! A parser turns a byte buffer into log messages. It never owns the input:
//! the caller feeds whatever it has read so far and drops the consumed prefix.
//!
//! ```text
//!  bytes ──► Parser::parse(input, eof)
//!              │
//!              ├─ Parsed { consumed, output: Some(Message) }      -> entry
//!              ├─ Parsed { consumed, output: Some(Attachment) }   -> transfer frame
//!              ├─ Parsed { consumed, output: None }               -> filtered / skipped
//!              └─ Incomplete                                      -> read more
//! ```

use serde::{Deserialize, Serialize};

use crate::attachment::TransferFrame;
use crate::error::ParserResult;
use crate::record::{RecordParser, RecordParserOptions};
use crate::text::TextParser;

/// One rendered log message
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Rendered text, one line
    pub content: String,
    /// Original bytes the message was parsed from
    pub raw: Vec<u8>,
    /// Unix time in milliseconds, if the format carries one
    pub timestamp: Option<i64>,
}

/// What a successful parse step produced
#[derive(Debug, Clone)]
pub enum ParseYield {
    Message(LogMessage),
    Attachment(TransferFrame),
    MessageAndAttachment(LogMessage, TransferFrame),
}

impl ParseYield {
    pub fn message(&self) -> Option<&LogMessage> {
        match self {
            ParseYield::Message(msg) | ParseYield::MessageAndAttachment(msg, _) => Some(msg),
            ParseYield::Attachment(_) => None,
        }
    }

    pub fn into_parts(self) -> (Option<LogMessage>, Option<TransferFrame>) {
        match self {
            ParseYield::Message(msg) => (Some(msg), None),
            ParseYield::Attachment(frame) => (None, Some(frame)),
            ParseYield::MessageAndAttachment(msg, frame) => (Some(msg), Some(frame)),
        }
    }
}

/// Result of a single parse step
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// `consumed` bytes were used; `output` is `None` when the item was skipped
    Parsed { consumed: usize, output: Option<ParseYield> },
    /// Not enough bytes for one item
    Incomplete,
}

/// A pluggable log format
pub trait Parser: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Parse one item from the front of `input`
    ///
    /// `eof` signals that no more bytes will follow, so a trailing partial item
    /// must be either flushed or rejected.
    fn parse(&mut self, input: &[u8], eof: bool) -> ParserResult<ParseOutcome>;
}

/// Parser selection for an observed source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options")]
pub enum ParserType {
    Text,
    Record(RecordParserOptions),
}

impl ParserType {
    /// Build a fresh parser instance
    pub fn build(&self) -> ParserResult<Box<dyn Parser>> {
        match self {
            ParserType::Text => Ok(Box::new(TextParser::new())),
            ParserType::Record(options) => Ok(Box::new(RecordParser::new(options.clone())?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParserType::Text => "text",
            ParserType::Record(_) => "record",
        }
    }
}

/// Run `parser` over `input` until it needs more bytes
///
/// Returns the number of consumed bytes. Every produced item goes to `sink`.
pub fn parse_buffer(
    parser: &mut dyn Parser,
    input: &[u8],
    eof: bool,
    mut sink: impl FnMut(ParseYield),
) -> ParserResult<usize> {
    let mut offset = 0usize;
    while offset < input.len() {
        match parser.parse(&input[offset..], eof)? {
            ParseOutcome::Parsed { consumed, output } => {
                if consumed == 0 {
                    break;
                }
                offset += consumed;
                if let Some(item) = output {
                    sink(item);
                }
            }
            ParseOutcome::Incomplete => break,
        }
    }
    Ok(offset)
}
