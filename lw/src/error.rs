//! Error types for the session engine
//!
//! `ComputationError` is what session calls return. `NativeError` is the
//! serializable form carried by events and rejected tasks.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use logparse::ParserError;

/// How bad an error is for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Category of a native error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeErrorKind {
    FileNotFound,
    UnsupportedFileType,
    ComputationFailed,
    Configuration,
    Interrupted,
    OperationSearch,
    NotYetImplemented,
    ChannelError,
    Io,
    Grabber,
}

/// Serializable error payload
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?} ({severity:?}): {message}")]
pub struct NativeError {
    pub severity: Severity,
    pub kind: NativeErrorKind,
    pub message: String,
}

impl NativeError {
    pub fn new(severity: Severity, kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
        }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, NativeErrorKind::ChannelError, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, NativeErrorKind::Io, message)
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, NativeErrorKind::ComputationFailed, message)
    }
}

/// Errors from reading entries out of the stream
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GrabError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("IO error: {0}")]
    IoOperation(String),

    #[error("Invalid range {range:?}: {context}")]
    InvalidRange { range: Range<u64>, context: String },

    #[error("Grabbing interrupted")]
    Interrupted,

    #[error("Grabber not initialized")]
    NotInitialize,

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Errors from search, extraction and value collection
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid regex: {0}")]
    Regex(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    IoOperation(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Search aborted: {0}")]
    Aborted(String),
}

/// Errors returned by session calls
#[derive(Debug, Clone, Error)]
pub enum ComputationError {
    #[error("Destination path is not defined")]
    DestinationPath,

    #[error("Fail to create session")]
    SessionCreatingFail,

    #[error("Native communication error: {0}")]
    Communication(String),

    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("IO error: {0}")]
    IoOperation(String),

    #[error("Invalid data error")]
    InvalidData,

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Error during processing: {0}")]
    Process(String),

    #[error("Wrong usage of API: {0}")]
    Protocol(String),

    #[error("Search related error: {0}")]
    SearchError(#[from] SearchError),

    #[error("start method can be called just once")]
    MultipleInitCall,

    #[error("Session is destroyed or not available yet")]
    SessionUnavailable,

    #[error("{0}")]
    NativeError(NativeError),

    #[error("Grabbing content not possible: {0}")]
    Grabbing(#[from] GrabError),
}

impl From<std::io::Error> for ComputationError {
    fn from(e: std::io::Error) -> Self {
        ComputationError::IoOperation(e.to_string())
    }
}

impl From<ParserError> for ComputationError {
    fn from(e: ParserError) -> Self {
        match e {
            ParserError::Io(e) => ComputationError::IoOperation(e.to_string()),
            ParserError::Options(msg) => ComputationError::InvalidArgs(msg),
            ParserError::Format { .. } => ComputationError::InvalidArgs(e.to_string()),
            other => ComputationError::Process(other.to_string()),
        }
    }
}

impl From<NativeError> for ComputationError {
    fn from(e: NativeError) -> Self {
        ComputationError::NativeError(e)
    }
}

impl From<ComputationError> for NativeError {
    fn from(e: ComputationError) -> Self {
        let kind = match &e {
            ComputationError::NativeError(native) => return native.clone(),
            ComputationError::IoOperation(_) => NativeErrorKind::Io,
            ComputationError::SearchError(_) => NativeErrorKind::OperationSearch,
            ComputationError::Grabbing(_) => NativeErrorKind::Grabber,
            ComputationError::Communication(_) | ComputationError::SessionUnavailable => NativeErrorKind::ChannelError,
            ComputationError::InvalidArgs(_) | ComputationError::DestinationPath => NativeErrorKind::Configuration,
            ComputationError::OperationNotSupported(_) => NativeErrorKind::NotYetImplemented,
            _ => NativeErrorKind::ComputationFailed,
        };
        NativeError::new(Severity::Error, kind, e.to_string())
    }
}

impl From<ParserError> for NativeError {
    fn from(e: ParserError) -> Self {
        match e {
            ParserError::Interrupted => NativeError::new(Severity::Warning, NativeErrorKind::Interrupted, "interrupted"),
            ParserError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                NativeError::new(Severity::Error, NativeErrorKind::FileNotFound, e.to_string())
            }
            other => ComputationError::from(other).into(),
        }
    }
}

impl From<SearchError> for NativeError {
    fn from(e: SearchError) -> Self {
        NativeError::new(Severity::Error, NativeErrorKind::OperationSearch, e.to_string())
    }
}

impl From<GrabError> for NativeError {
    fn from(e: GrabError) -> Self {
        NativeError::new(Severity::Error, NativeErrorKind::Grabber, e.to_string())
    }
}

impl From<std::io::Error> for NativeError {
    fn from(e: std::io::Error) -> Self {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            NativeErrorKind::FileNotFound
        } else {
            NativeErrorKind::Io
        };
        NativeError::new(Severity::Error, kind, e.to_string())
    }
}

pub type ComputationResult<T> = Result<T, ComputationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_error_into_computation() {
        let err: ComputationError = GrabError::InvalidRange {
            range: 5..10,
            context: "stream has 7 entries".to_string(),
        }
        .into();
        assert!(matches!(err, ComputationError::Grabbing(GrabError::InvalidRange { .. })));
        assert!(err.to_string().contains("5..10"));
    }

    #[test]
    fn test_native_error_kind_mapping() {
        let native: NativeError = ComputationError::SearchError(SearchError::Input("empty".to_string())).into();
        assert_eq!(native.kind, NativeErrorKind::OperationSearch);

        let native: NativeError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(native.kind, NativeErrorKind::FileNotFound);
    }

    #[test]
    fn test_native_error_passthrough() {
        let original = NativeError::new(Severity::Warning, NativeErrorKind::Interrupted, "stop");
        let native: NativeError = ComputationError::NativeError(original.clone()).into();
        assert_eq!(native, original);
    }

    #[test]
    fn test_native_error_serde() {
        let native = NativeError::io("disk");
        let json = serde_json::to_string(&native).unwrap();
        let back: NativeError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, native);
    }
}
