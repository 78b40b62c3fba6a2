//! Record parser with id/level filtering

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{Level, Record, RecordKind, find_magic};
use crate::attachment::TransferFrame;
use crate::error::{ParserError, ParserResult};
use crate::parser::{LogMessage, ParseOutcome, ParseYield, Parser};

/// Filtering options for the record parser
///
/// `None` means "accept everything" for that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordParserOptions {
    #[serde(rename = "ecu-ids")]
    pub ecu_ids: Option<Vec<String>>,

    #[serde(rename = "app-ids")]
    pub app_ids: Option<Vec<String>>,

    #[serde(rename = "context-ids")]
    pub context_ids: Option<Vec<String>>,

    /// Most verbose level to keep (records above it are dropped)
    #[serde(rename = "min-level")]
    pub min_level: Option<Level>,
}

impl RecordParserOptions {
    pub fn validate(&self) -> ParserResult<()> {
        for (name, ids) in [
            ("ecu-ids", &self.ecu_ids),
            ("app-ids", &self.app_ids),
            ("context-ids", &self.context_ids),
        ] {
            if let Some(ids) = ids {
                if ids.is_empty() {
                    return Err(ParserError::Options(format!("{} must not be empty when set", name)));
                }
                if let Some(id) = ids.iter().find(|id| id.is_empty() || id.len() > 4) {
                    return Err(ParserError::Options(format!("{} contains invalid id '{}'", name, id)));
                }
            }
        }
        Ok(())
    }

    pub fn accepts(&self, record: &Record) -> bool {
        fn contains(ids: &Option<Vec<String>>, id: &str) -> bool {
            ids.as_ref().is_none_or(|ids| ids.iter().any(|i| i == id))
        }
        if let Some(level) = self.min_level
            && record.level > level
        {
            return false;
        }
        contains(&self.ecu_ids, &record.ecu)
            && contains(&self.app_ids, &record.app)
            && contains(&self.context_ids, &record.context)
    }
}

/// Parses `LWR1` records
#[derive(Debug)]
pub struct RecordParser {
    options: RecordParserOptions,
    skipped_bytes: u64,
}

impl RecordParser {
    pub fn new(options: RecordParserOptions) -> ParserResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            skipped_bytes: 0,
        })
    }

    /// Bytes dropped while resynchronizing on corrupt input
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    fn resync(&mut self, input: &[u8], eof: bool, reason: &str) -> ParseOutcome {
        let consumed = match find_magic(input, 1) {
            Some(next) => next,
            // keep a possible partial magic at the tail unless the input is over
            None if eof => input.len(),
            None => input.len().saturating_sub(3).max(1),
        };
        warn!("RecordParser: skipping {} bytes ({})", consumed, reason);
        self.skipped_bytes += consumed as u64;
        ParseOutcome::Parsed {
            consumed,
            output: None,
        }
    }
}

impl Parser for RecordParser {
    fn name(&self) -> &'static str {
        "record"
    }

    fn parse(&mut self, input: &[u8], eof: bool) -> ParserResult<ParseOutcome> {
        let (record, consumed) = match Record::decode(input) {
            Ok(Some(decoded)) => decoded,
            Ok(None) if eof && !input.is_empty() => {
                return Err(ParserError::Incomplete(format!(
                    "{} trailing bytes do not form a record",
                    input.len()
                )));
            }
            Ok(None) => return Ok(ParseOutcome::Incomplete),
            Err(e) => return Ok(self.resync(input, eof, &e.to_string())),
        };
        if !self.options.accepts(&record) {
            debug!("RecordParser: filtered record ecu={} app={}", record.ecu, record.app);
            return Ok(ParseOutcome::Parsed { consumed, output: None });
        }
        let message = LogMessage {
            content: record.render(),
            raw: input[..consumed].to_vec(),
            timestamp: Some(record.timestamp as i64),
        };
        let output = match record.kind {
            RecordKind::Log => ParseYield::Message(message),
            kind => match TransferFrame::decode(kind, &record.payload) {
                Ok(frame) => ParseYield::MessageAndAttachment(message, frame),
                Err(e) => {
                    warn!("RecordParser: broken transfer frame: {}", e);
                    ParseYield::Message(message)
                }
            },
        };
        Ok(ParseOutcome::Parsed {
            consumed,
            output: Some(output),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_buffer;

    fn sample() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(Record::log(1, "ECU1", "APP1", "CTX1", Level::Info, "one").encode());
        bytes.extend(Record::log(2, "ECU2", "APP1", "CTX1", Level::Debug, "two").encode());
        bytes.extend(Record::log(3, "ECU1", "APP2", "CTX2", Level::Error, "three").encode());
        bytes
    }

    fn payloads(parser: &mut RecordParser, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        parse_buffer(parser, bytes, true, |item| {
            let content = item.message().unwrap().content.clone();
            out.push(content.rsplit(crate::COLUMN_SENTINEL).next().unwrap().to_string());
        })
        .unwrap();
        out
    }

    #[test]
    fn test_parse_all() {
        let mut parser = RecordParser::new(RecordParserOptions::default()).unwrap();
        assert_eq!(payloads(&mut parser, &sample()), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_filter_by_ecu() {
        let options = RecordParserOptions {
            ecu_ids: Some(vec!["ECU1".to_string()]),
            ..Default::default()
        };
        let mut parser = RecordParser::new(options).unwrap();
        assert_eq!(payloads(&mut parser, &sample()), vec!["one", "three"]);
    }

    #[test]
    fn test_filter_by_level() {
        let options = RecordParserOptions {
            min_level: Some(Level::Info),
            ..Default::default()
        };
        let mut parser = RecordParser::new(options).unwrap();
        assert_eq!(payloads(&mut parser, &sample()), vec!["one", "three"]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut bytes = b"garbage".to_vec();
        bytes.extend(sample());
        let mut parser = RecordParser::new(RecordParserOptions::default()).unwrap();
        assert_eq!(payloads(&mut parser, &bytes), vec!["one", "two", "three"]);
        assert_eq!(parser.skipped_bytes(), 7);
    }

    #[test]
    fn test_truncated_tail_at_eof_fails() {
        let bytes = sample();
        let mut parser = RecordParser::new(RecordParserOptions::default()).unwrap();
        let result = parse_buffer(&mut parser, &bytes[..bytes.len() - 2], true, |_| {});
        assert!(matches!(result, Err(ParserError::Incomplete(_))));
    }

    #[test]
    fn test_raw_is_exact_record() {
        let record = Record::log(9, "E", "A", "C", Level::Info, "raw");
        let bytes = record.encode();
        let mut parser = RecordParser::new(RecordParserOptions::default()).unwrap();
        match parser.parse(&bytes, true).unwrap() {
            ParseOutcome::Parsed {
                output: Some(ParseYield::Message(msg)),
                ..
            } => {
                assert_eq!(msg.raw, bytes);
                assert_eq!(msg.timestamp, Some(9));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_options() {
        let options = RecordParserOptions {
            app_ids: Some(vec![]),
            ..Default::default()
        };
        assert!(RecordParser::new(options).is_err());
    }
}
