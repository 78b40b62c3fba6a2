//! Parser errors

use thiserror::Error;

/// Errors raised by parsers and the tools built on them
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Incomplete input: {0}")]
    Incomplete(String),

    #[error("Invalid options: {0}")]
    Options(String),

    #[error("Invalid timestamp format '{format}': {reason}")]
    Format { format: String, reason: String },

    #[error("File transfer error: {0}")]
    Transfer(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ParserResult<T> = Result<T, ParserError>;
