//! Event provider - typed pub/sub for one session
//!
//! Each event stream is a [`Subject`] backed by a tokio broadcast channel.
//! The provider fans every emitted [`SessionEvent`] out to its typed subject
//! and to the combined `all` subject.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::debug::DebugStat;
use super::types::{AttachmentInfo, EVENT_NAMES, JobsEvent, Progress, SessionEvent};
use crate::error::NativeError;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// One broadcast stream of `T`
pub struct Subject<T: Clone> {
    name: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Subject<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fire-and-forget: without subscribers the value is dropped
    pub fn emit(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Receives everything emitted after this call
    pub fn subscribe(&self) -> Subscription<T> {
        debug!(subject = self.name, "Subject::subscribe: new subscriber");
        Subscription {
            name: self.name,
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of a subject; dropping it unsubscribes
pub struct Subscription<T: Clone> {
    name: &'static str,
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Next value; `None` once unsubscribed or the subject is gone
    ///
    /// Delivery is at most once: a subscriber that lags past the channel
    /// capacity skips the overwritten values and only gets a warning logged.
    pub async fn recv(&mut self) -> Option<T> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(n)) => {
                    warn!(subject = self.name, missed = n, "Subscription: lagged behind, missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(subject = self.name, missed = n, "Subscription: lagged behind, missed events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        debug!(subject = self.name, "Subscription::unsubscribe");
        self.rx = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.rx.is_some()
    }
}

/// Per-session event fan-out
pub struct EventProvider {
    pub stream_updated: Subject<u64>,
    pub file_read: Subject<()>,
    pub search_updated: Subject<(u64, HashMap<String, u64>)>,
    pub search_map_updated: Subject<Option<String>>,
    pub search_values_updated: Subject<Option<HashMap<u8, (f64, f64)>>>,
    pub indexed_map_updated: Subject<u64>,
    pub attachments_updated: Subject<(u64, AttachmentInfo)>,
    pub progress: Subject<(Uuid, Progress)>,
    pub session_error: Subject<NativeError>,
    pub operation_error: Subject<(Uuid, NativeError)>,
    pub operation_started: Subject<Uuid>,
    pub operation_processing: Subject<Uuid>,
    pub operation_done: Subject<(Uuid, Option<String>)>,
    pub session_destroyed: Subject<()>,
    /// Every event, in emission order
    pub all: Subject<SessionEvent>,
    debug: Mutex<Option<DebugStat>>,
}

impl EventProvider {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventProvider::new: creating provider");
        Self {
            stream_updated: Subject::new("StreamUpdated", capacity),
            file_read: Subject::new("FileRead", capacity),
            search_updated: Subject::new("SearchUpdated", capacity),
            search_map_updated: Subject::new("SearchMapUpdated", capacity),
            search_values_updated: Subject::new("SearchValuesUpdated", capacity),
            indexed_map_updated: Subject::new("IndexedMapUpdated", capacity),
            attachments_updated: Subject::new("AttachmentsUpdated", capacity),
            progress: Subject::new("Progress", capacity),
            session_error: Subject::new("SessionError", capacity),
            operation_error: Subject::new("OperationError", capacity),
            operation_started: Subject::new("OperationStarted", capacity),
            operation_processing: Subject::new("OperationProcessing", capacity),
            operation_done: Subject::new("OperationDone", capacity),
            session_destroyed: Subject::new("SessionDestroyed", capacity),
            all: Subject::new("all", capacity),
            debug: Mutex::new(None),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    fn debug_stat(&self) -> MutexGuard<'_, Option<DebugStat>> {
        self.debug.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit an event to its subject and to `all`
    pub fn emit(&self, event: SessionEvent) {
        debug!(event_type = event.event_type(), "EventProvider::emit");
        if let Some(stat) = self.debug_stat().as_mut() {
            stat.add_event(event.event_type());
            match &event {
                SessionEvent::SessionError { error } | SessionEvent::OperationError { error, .. } => {
                    stat.add_error(error.to_string())
                }
                _ => {}
            }
        }
        self.all.emit(event.clone());
        match event {
            SessionEvent::StreamUpdated { len } => self.stream_updated.emit(len),
            SessionEvent::FileRead => self.file_read.emit(()),
            SessionEvent::SearchUpdated { found, stat } => self.search_updated.emit((found, stat)),
            SessionEvent::SearchMapUpdated { update } => self.search_map_updated.emit(update),
            SessionEvent::SearchValuesUpdated { values } => self.search_values_updated.emit(values),
            SessionEvent::IndexedMapUpdated { len } => self.indexed_map_updated.emit(len),
            SessionEvent::AttachmentsUpdated { len, attachment } => self.attachments_updated.emit((len, attachment)),
            SessionEvent::Progress { uuid, progress } => self.progress.emit((uuid, progress)),
            SessionEvent::SessionError { error } => self.session_error.emit(error),
            SessionEvent::OperationError { uuid, error } => self.operation_error.emit((uuid, error)),
            SessionEvent::OperationStarted { uuid } => self.operation_started.emit(uuid),
            SessionEvent::OperationProcessing { uuid } => self.operation_processing.emit(uuid),
            SessionEvent::OperationDone { uuid, result } => self.operation_done.emit((uuid, result)),
            SessionEvent::SessionDestroyed => self.session_destroyed.emit(()),
        }
    }

    /// Decode a serialized event and emit it
    ///
    /// Unknown `type` names are recorded as unsupported and skipped.
    pub fn dispatch_raw(&self, json: &str) -> Result<(), serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let name = value.get("type").and_then(|t| t.as_str()).unwrap_or_default().to_string();
        if !EVENT_NAMES.contains(&name.as_str()) {
            warn!(%name, "EventProvider::dispatch_raw: unsupported event");
            if let Some(stat) = self.debug_stat().as_mut() {
                stat.add_unsupported(&name);
            }
            return Ok(());
        }
        let event: SessionEvent = serde_json::from_value(value)?;
        self.emit(event);
        Ok(())
    }

    /// Turn debug statistics on (fresh) or off
    pub fn set_debug(&self, enabled: bool, alias: &str) {
        debug!(enabled, %alias, "EventProvider::set_debug: called");
        *self.debug_stat() = if enabled { Some(DebugStat::new(alias)) } else { None };
    }

    pub fn is_debug(&self) -> bool {
        self.debug_stat().is_some()
    }

    pub fn debug_operation_started(&self, name: &str, uuid: Uuid) {
        if let Some(stat) = self.debug_stat().as_mut() {
            stat.operation_started(name, uuid);
        }
    }

    pub fn debug_operation_ended(&self, uuid: Uuid) {
        if let Some(stat) = self.debug_stat().as_mut() {
            stat.operation_ended(uuid);
        }
    }

    /// Summary of the debug statistics, if enabled
    pub fn debug_report(&self) -> Option<String> {
        self.debug_stat().as_ref().map(DebugStat::report)
    }

    /// Order check of the debug statistics; `Ok` when debug is off
    pub fn debug_check_order(&self) -> Result<(), String> {
        self.debug_stat().as_ref().map_or(Ok(()), DebugStat::check_order)
    }

    /// Inspect the debug statistics in place
    pub fn with_debug<R>(&self, f: impl FnOnce(&DebugStat) -> R) -> Option<R> {
        self.debug_stat().as_ref().map(f)
    }
}

impl Default for EventProvider {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Event fan-out of the unbound jobs facility
pub struct JobsEventProvider {
    pub started: Subject<Uuid>,
    pub stopped: Subject<Uuid>,
    pub all: Subject<JobsEvent>,
}

impl JobsEventProvider {
    pub fn new(capacity: usize) -> Self {
        Self {
            started: Subject::new("Started", capacity),
            stopped: Subject::new("Stopped", capacity),
            all: Subject::new("all", capacity),
        }
    }

    pub fn emit(&self, event: JobsEvent) {
        debug!(?event, "JobsEventProvider::emit");
        self.all.emit(event.clone());
        match event {
            JobsEvent::Started { uuid } => self.started.emit(uuid),
            JobsEvent::Stopped { uuid } => self.stopped.emit(uuid),
        }
    }
}

impl Default for JobsEventProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
