//! Per-session event delivery
//!
//! Every session owns one [`EventProvider`]. The state actor and the running
//! operations emit into it once state is committed; clients, the JSONL logger
//! and tests subscribe.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ State actor  │   │  Operations  │   │   Tracker    │
//! │ StreamUpdated│   │ Progress     │   │ OperationDone│
//! │ SearchUpdated│   │ FileRead     │   │ OperationErr │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────┐
//! │                   EVENT PROVIDER                     │
//! │   one broadcast Subject per event + combined `all`   │
//! │         optional DebugStat (order, errors)           │
//! └─────────────────────────────────────────────────────┘
//!        ↓                  ↓                  ↓
//!   Subscription<u64>  Subscription<..>   EventLogger (.jsonl)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut len = session.events().stream_updated.subscribe();
//! session.observe(options).await;
//! while let Some(len) = len.try_recv() {
//!     println!("stream holds {} entries", len);
//! }
//! ```

mod debug;
mod logger;
mod provider;
mod types;

pub use debug::{DebugStat, OrderEntry};
pub use logger::{EventLogger, read_events, spawn_event_logger};
pub use provider::{DEFAULT_CHANNEL_CAPACITY, EventProvider, JobsEventProvider, Subject, Subscription};
pub use types::{AttachmentInfo, EVENT_NAMES, EventLogEntry, JobsEvent, Progress, SessionEvent};
