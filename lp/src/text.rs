//! Plain text line parser

use crate::error::ParserResult;
use crate::parser::{LogMessage, ParseOutcome, ParseYield, Parser};

/// Splits input on `\n`, stripping a trailing `\r`
#[derive(Debug, Default)]
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }

    fn message(line: &[u8], raw: Vec<u8>) -> ParseYield {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        ParseYield::Message(LogMessage {
            content: String::from_utf8_lossy(line).into_owned(),
            raw,
            timestamp: None,
        })
    }
}

impl Parser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(&mut self, input: &[u8], eof: bool) -> ParserResult<ParseOutcome> {
        if let Some(idx) = input.iter().position(|b| *b == b'\n') {
            let raw = input[..=idx].to_vec();
            return Ok(ParseOutcome::Parsed {
                consumed: idx + 1,
                output: Some(Self::message(&input[..idx], raw)),
            });
        }
        if eof && !input.is_empty() {
            let mut raw = input.to_vec();
            raw.push(b'\n');
            return Ok(ParseOutcome::Parsed {
                consumed: input.len(),
                output: Some(Self::message(input, raw)),
            });
        }
        Ok(ParseOutcome::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(outcome: ParseOutcome) -> (usize, String) {
        match outcome {
            ParseOutcome::Parsed {
                consumed,
                output: Some(item),
            } => (consumed, item.message().unwrap().content.clone()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut parser = TextParser::new();
        let (consumed, line) = content(parser.parse(b"hello\r\nworld", false).unwrap());
        assert_eq!(consumed, 7);
        assert_eq!(line, "hello");
    }

    #[test]
    fn test_partial_line_waits_for_more() {
        let mut parser = TextParser::new();
        assert!(matches!(parser.parse(b"partial", false).unwrap(), ParseOutcome::Incomplete));
    }

    #[test]
    fn test_partial_line_flushed_at_eof() {
        let mut parser = TextParser::new();
        let outcome = parser.parse(b"tail", true).unwrap();
        match outcome {
            ParseOutcome::Parsed {
                output: Some(ParseYield::Message(msg)),
                ..
            } => {
                assert_eq!(msg.content, "tail");
                assert_eq!(msg.raw, b"tail\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_empty_line() {
        let mut parser = TextParser::new();
        let (consumed, line) = content(parser.parse(b"\nnext", false).unwrap());
        assert_eq!(consumed, 1);
        assert_eq!(line, "");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut parser = TextParser::new();
        let (_, line) = content(parser.parse(b"a\xffb\n", false).unwrap());
        assert_eq!(line, "a\u{fffd}b");
    }
}
