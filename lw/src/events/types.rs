//! Event types emitted by a session
//!
//! These events represent everything a client can observe:
//! - Stream growth (`StreamUpdated`, `FileRead`, `AttachmentsUpdated`)
//! - Search state (`SearchUpdated`, `SearchMapUpdated`, `SearchValuesUpdated`, `IndexedMapUpdated`)
//! - Operation lifecycle (`OperationStarted` .. `OperationDone`, `Progress`)
//! - Session lifecycle (`SessionError`, `SessionDestroyed`)

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NativeError;

/// Progress of a long-running operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Progress {
    Ticks { count: u64, total: Option<u64> },
    Stopped,
}

/// Attachment assembled while observing a record source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub uuid: Uuid,
    /// Where the content was written
    pub filepath: PathBuf,
    pub name: String,
    pub ext: Option<String>,
    pub size: usize,
    pub created: String,
    /// Stream positions of the entries that carried the transfer
    pub messages: Vec<u64>,
}

/// Session event vocabulary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// The stream holds `len` entries
    StreamUpdated { len: u64 },
    /// A finite source was read to its end
    FileRead,
    /// The match index holds `found` entries; `stat` counts matches per filter value
    SearchUpdated { found: u64, stat: HashMap<String, u64> },
    /// The search map changed (`None` when dropped)
    SearchMapUpdated { update: Option<String> },
    /// Min/max per value filter (`None` when dropped)
    SearchValuesUpdated {
        #[serde(with = "value_ranges")]
        values: Option<HashMap<u8, (f64, f64)>>,
    },
    /// The indexed view holds `len` entries
    IndexedMapUpdated { len: u64 },
    AttachmentsUpdated { len: u64, attachment: AttachmentInfo },
    Progress { uuid: Uuid, progress: Progress },
    SessionError { error: NativeError },
    OperationError { uuid: Uuid, error: NativeError },
    OperationStarted { uuid: Uuid },
    OperationProcessing { uuid: Uuid },
    OperationDone { uuid: Uuid, result: Option<String> },
    SessionDestroyed,
}

/// Integer map keys do not survive internally tagged enums, so the map
/// travels as a list of `[filter, [min, max]]` pairs
mod value_ranges {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    type Ranges = Option<HashMap<u8, (f64, f64)>>;

    pub fn serialize<S: Serializer>(value: &Ranges, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Option<Vec<(u8, (f64, f64))>> = value.as_ref().map(|map| {
            let mut pairs: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
            pairs.sort_by_key(|(k, _)| *k);
            pairs
        });
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ranges, D::Error> {
        let pairs = Option::<Vec<(u8, (f64, f64))>>::deserialize(deserializer)?;
        Ok(pairs.map(|pairs| pairs.into_iter().collect()))
    }
}

/// Every `type` name `SessionEvent` can deserialize
pub const EVENT_NAMES: &[&str] = &[
    "StreamUpdated",
    "FileRead",
    "SearchUpdated",
    "SearchMapUpdated",
    "SearchValuesUpdated",
    "IndexedMapUpdated",
    "AttachmentsUpdated",
    "Progress",
    "SessionError",
    "OperationError",
    "OperationStarted",
    "OperationProcessing",
    "OperationDone",
    "SessionDestroyed",
];

impl SessionEvent {
    /// Get the event type name as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::StreamUpdated { .. } => "StreamUpdated",
            SessionEvent::FileRead => "FileRead",
            SessionEvent::SearchUpdated { .. } => "SearchUpdated",
            SessionEvent::SearchMapUpdated { .. } => "SearchMapUpdated",
            SessionEvent::SearchValuesUpdated { .. } => "SearchValuesUpdated",
            SessionEvent::IndexedMapUpdated { .. } => "IndexedMapUpdated",
            SessionEvent::AttachmentsUpdated { .. } => "AttachmentsUpdated",
            SessionEvent::Progress { .. } => "Progress",
            SessionEvent::SessionError { .. } => "SessionError",
            SessionEvent::OperationError { .. } => "OperationError",
            SessionEvent::OperationStarted { .. } => "OperationStarted",
            SessionEvent::OperationProcessing { .. } => "OperationProcessing",
            SessionEvent::OperationDone { .. } => "OperationDone",
            SessionEvent::SessionDestroyed => "SessionDestroyed",
        }
    }

    /// Operation the event belongs to, if any
    pub fn operation(&self) -> Option<Uuid> {
        match self {
            SessionEvent::Progress { uuid, .. }
            | SessionEvent::OperationError { uuid, .. }
            | SessionEvent::OperationStarted { uuid }
            | SessionEvent::OperationProcessing { uuid }
            | SessionEvent::OperationDone { uuid, .. } => Some(*uuid),
            _ => None,
        }
    }
}

/// Events of the out-of-session jobs facility
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobsEvent {
    Started { uuid: Uuid },
    Stopped { uuid: Uuid },
}

/// A timestamped event entry for JSONL logging
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: SessionEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: SessionEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
