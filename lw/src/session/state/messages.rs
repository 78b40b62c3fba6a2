//! State manager messages
//!
//! Commands and responses for the actor pattern.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ComputationResult;
use crate::events::AttachmentInfo;
use crate::indexes::{Mode, Nature};
use crate::search::{FilterMatch, FilterMatcher, NearestPosition, NestedMatch, Point, ScaledMap, ValueFilters};
use crate::stream::{GrabbedElement, SourceDefinition, StreamEntry, StreamStatus};

/// Response from state operations
pub type StateResponse<T> = ComputationResult<T>;

/// Where a chunked computation stands after a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitProgress {
    /// Matches (or value rows) held so far
    pub found: u64,
    /// The commit reached the end of the stream; later entries are handled inline
    pub complete: bool,
    /// Position the next chunk starts from
    pub searched_to: u64,
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Stream
    AddSource {
        alias: String,
        reply: oneshot::Sender<StateResponse<u16>>,
    },
    GetSources {
        reply: oneshot::Sender<StateResponse<Vec<SourceDefinition>>>,
    },
    Append {
        entries: Vec<StreamEntry>,
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    ObserveStarted {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ObserveFinished {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    FileRead {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetStatus {
        reply: oneshot::Sender<StateResponse<StreamStatus>>,
    },
    GetStreamLen {
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    Grab {
        start: u64,
        count: u64,
        reply: oneshot::Sender<StateResponse<Vec<GrabbedElement>>>,
    },
    GrabRanges {
        ranges: Vec<RangeInclusive<u64>>,
        reply: oneshot::Sender<StateResponse<Vec<GrabbedElement>>>,
    },
    GrabRaw {
        start: u64,
        count: u64,
        reply: oneshot::Sender<StateResponse<Vec<Vec<u8>>>>,
    },
    GetContent {
        from: u64,
        count: u64,
        reply: oneshot::Sender<StateResponse<Vec<(u64, String)>>>,
    },

    // Attachments
    AddAttachment {
        attachment: AttachmentInfo,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetAttachments {
        reply: oneshot::Sender<StateResponse<Vec<AttachmentInfo>>>,
    },

    // Search
    SetSearch {
        matcher: FilterMatcher,
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    CommitSearch {
        generation: u64,
        from: u64,
        to: u64,
        matches: Vec<FilterMatch>,
        reply: oneshot::Sender<StateResponse<Option<CommitProgress>>>,
    },
    DropSearch {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetSearchLen {
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    GrabSearch {
        start: u64,
        count: u64,
        reply: oneshot::Sender<StateResponse<Vec<GrabbedElement>>>,
    },
    GetMap {
        dataset_len: u16,
        range: Option<RangeInclusive<u64>>,
        reply: oneshot::Sender<StateResponse<ScaledMap>>,
    },
    GetNearest {
        position: u64,
        reply: oneshot::Sender<StateResponse<Option<NearestPosition>>>,
    },
    NestedMatch {
        regex: Regex,
        from: u64,
        backward: bool,
        reply: oneshot::Sender<StateResponse<Option<NestedMatch>>>,
    },

    // Values
    SetValues {
        filters: ValueFilters,
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    CommitValues {
        generation: u64,
        from: u64,
        to: u64,
        rows: Vec<(u64, Vec<(u8, f64)>)>,
        reply: oneshot::Sender<StateResponse<Option<CommitProgress>>>,
    },
    DropValues {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetValues {
        dataset_len: u16,
        frame: Option<RangeInclusive<u64>>,
        reply: oneshot::Sender<StateResponse<HashMap<u8, Vec<Point>>>>,
    },

    // Indexed view
    SetIndexingMode {
        mode: Mode,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetIndexedLen {
        reply: oneshot::Sender<StateResponse<u64>>,
    },
    GrabIndexed {
        start: u64,
        count: u64,
        reply: oneshot::Sender<StateResponse<Vec<GrabbedElement>>>,
    },
    ExpandBreadcrumbs {
        separator: u64,
        offset: u64,
        above: bool,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    AddBookmark {
        row: u64,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RemoveBookmark {
        row: u64,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    SetBookmarks {
        rows: Vec<u64>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    SetIndexes {
        nature: Nature,
        ranges: Vec<RangeInclusive<u64>>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    UnsetIndexes {
        nature: Nature,
        ranges: Vec<RangeInclusive<u64>>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetAroundIndexes {
        position: u64,
        reply: oneshot::Sender<StateResponse<(Option<u64>, Option<u64>)>>,
    },
    GetIndexedRanges {
        reply: oneshot::Sender<StateResponse<Vec<RangeInclusive<u64>>>>,
    },

    // Faults and shutdown
    TriggerError,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
