//! logweave - session-scoped log ingestion, indexing and search
//!
//! A [`Session`] observes files or live streams through a `logparse` parser
//! into an append-only stream, keeps a search index and an indexed view
//! (matches, bookmarks, breadcrumbs) consistent with it, and reports every
//! change through typed events.
//!
//! # Modules
//!
//! - [`session`] - session handle, state actor and operation tracker
//! - [`stream`] - sources, observing, export and merge
//! - [`search`] - filters, match map, extraction and numeric values
//! - [`indexes`] - the indexed view and its breadcrumbs
//! - [`task`] - cancelable tasks returned by long operations
//! - [`events`] - per-session event fan-out and the JSONL event logger
//! - [`jobs`] - out-of-session jobs
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod indexes;
pub mod jobs;
pub mod search;
pub mod session;
pub mod stream;
pub mod task;

// Re-export commonly used types
pub use config::{BreadcrumbsConfig, Config, ExportConfig, SessionConfig};
pub use error::{ComputationError, ComputationResult, GrabError, NativeError, NativeErrorKind, SearchError, Severity};
pub use events::{AttachmentInfo, EventProvider, JobsEvent, Progress, SessionEvent, Subscription, spawn_event_logger};
pub use indexes::{Mode, Nature};
pub use jobs::{EntityKind, FolderEntity, FoldersScanningResult, UnboundJobs};
pub use search::{ExtractedMatchValue, FilterMatch, NearestPosition, NestedMatch, Point, ScaledMap, SearchFilter};
pub use session::{OperationStat, Session};
pub use stream::{
    ExportOptions, FileMergeOptions, GrabbedElement, ObserveOptions, ObserveOrigin, SourceDefinition, StreamStatus,
    Transport,
};
pub use task::{CancelableTask, TaskHandle, TaskOutcome};
