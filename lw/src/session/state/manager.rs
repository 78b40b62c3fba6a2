//! StateManager - actor that owns the SessionState
//!
//! Processes commands via channels so every mutation of the stream, the
//! search and the indexed view is serialized.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::messages::{CommitProgress, StateCommand, StateResponse};
use super::store::SessionState;
use crate::config::BreadcrumbsConfig;
use crate::error::{ComputationError, NativeError};
use crate::events::{AttachmentInfo, EventProvider};
use crate::indexes::{Mode, Nature};
use crate::search::{FilterMatch, FilterMatcher, NearestPosition, NestedMatch, Point, ScaledMap, ValueFilters};
use crate::stream::{GrabbedElement, SourceDefinition, StreamEntry, StreamStatus};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor
    ///
    /// The join handle yields `Err` when the actor stopped on a fault rather
    /// than on `Shutdown`.
    pub fn spawn(
        events: Arc<EventProvider>,
        breadcrumbs: BreadcrumbsConfig,
        capacity: usize,
    ) -> (Self, JoinHandle<Result<(), NativeError>>) {
        debug!(capacity, "spawn: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let state = SessionState::new(events, breadcrumbs);
        let join = tokio::spawn(actor_loop(state, rx));
        info!("StateManager spawned");
        (Self { tx }, join)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| ComputationError::SessionUnavailable)?;
        reply_rx.await.map_err(|_| ComputationError::SessionUnavailable)?
    }

    // === Stream ===

    pub async fn add_source(&self, alias: &str) -> StateResponse<u16> {
        debug!(%alias, "add_source: called");
        let alias = alias.to_string();
        self.request(|reply| StateCommand::AddSource { alias, reply }).await
    }

    pub async fn get_sources(&self) -> StateResponse<Vec<SourceDefinition>> {
        debug!("get_sources: called");
        self.request(|reply| StateCommand::GetSources { reply }).await
    }

    /// Append whole entries; returns the stream length
    pub async fn append(&self, entries: Vec<StreamEntry>) -> StateResponse<u64> {
        debug!(count = entries.len(), "append: called");
        self.request(|reply| StateCommand::Append { entries, reply }).await
    }

    pub async fn observe_started(&self) -> StateResponse<()> {
        debug!("observe_started: called");
        self.request(|reply| StateCommand::ObserveStarted { reply }).await
    }

    pub async fn observe_finished(&self) -> StateResponse<()> {
        debug!("observe_finished: called");
        self.request(|reply| StateCommand::ObserveFinished { reply }).await
    }

    pub async fn file_read(&self) -> StateResponse<()> {
        debug!("file_read: called");
        self.request(|reply| StateCommand::FileRead { reply }).await
    }

    pub async fn get_status(&self) -> StateResponse<StreamStatus> {
        self.request(|reply| StateCommand::GetStatus { reply }).await
    }

    pub async fn get_stream_len(&self) -> StateResponse<u64> {
        self.request(|reply| StateCommand::GetStreamLen { reply }).await
    }

    pub async fn grab(&self, start: u64, count: u64) -> StateResponse<Vec<GrabbedElement>> {
        debug!(start, count, "grab: called");
        self.request(|reply| StateCommand::Grab { start, count, reply }).await
    }

    pub async fn grab_ranges(&self, ranges: Vec<RangeInclusive<u64>>) -> StateResponse<Vec<GrabbedElement>> {
        debug!(ranges = ranges.len(), "grab_ranges: called");
        self.request(|reply| StateCommand::GrabRanges { ranges, reply }).await
    }

    pub async fn grab_raw(&self, start: u64, count: u64) -> StateResponse<Vec<Vec<u8>>> {
        debug!(start, count, "grab_raw: called");
        self.request(|reply| StateCommand::GrabRaw { start, count, reply }).await
    }

    /// Up to `count` `(position, content)` pairs from `from`
    pub async fn get_content(&self, from: u64, count: u64) -> StateResponse<Vec<(u64, String)>> {
        self.request(|reply| StateCommand::GetContent { from, count, reply }).await
    }

    // === Attachments ===

    pub async fn add_attachment(&self, attachment: AttachmentInfo) -> StateResponse<()> {
        debug!(name = %attachment.name, "add_attachment: called");
        self.request(|reply| StateCommand::AddAttachment { attachment, reply })
            .await
    }

    pub async fn get_attachments(&self) -> StateResponse<Vec<AttachmentInfo>> {
        self.request(|reply| StateCommand::GetAttachments { reply }).await
    }

    // === Search ===

    /// Replace the active search; returns its generation
    pub async fn set_search(&self, matcher: FilterMatcher) -> StateResponse<u64> {
        debug!(filters = matcher.filters().len(), "set_search: called");
        self.request(|reply| StateCommand::SetSearch { matcher, reply }).await
    }

    /// `None` when the search was superseded
    pub async fn commit_search(
        &self,
        generation: u64,
        from: u64,
        to: u64,
        matches: Vec<FilterMatch>,
    ) -> StateResponse<Option<CommitProgress>> {
        debug!(generation, from, to, found = matches.len(), "commit_search: called");
        self.request(|reply| StateCommand::CommitSearch {
            generation,
            from,
            to,
            matches,
            reply,
        })
        .await
    }

    pub async fn drop_search(&self) -> StateResponse<()> {
        debug!("drop_search: called");
        self.request(|reply| StateCommand::DropSearch { reply }).await
    }

    pub async fn get_search_len(&self) -> StateResponse<u64> {
        self.request(|reply| StateCommand::GetSearchLen { reply }).await
    }

    pub async fn grab_search(&self, start: u64, count: u64) -> StateResponse<Vec<GrabbedElement>> {
        debug!(start, count, "grab_search: called");
        self.request(|reply| StateCommand::GrabSearch { start, count, reply }).await
    }

    pub async fn get_map(&self, dataset_len: u16, range: Option<RangeInclusive<u64>>) -> StateResponse<ScaledMap> {
        debug!(dataset_len, ?range, "get_map: called");
        self.request(|reply| StateCommand::GetMap {
            dataset_len,
            range,
            reply,
        })
        .await
    }

    pub async fn get_nearest(&self, position: u64) -> StateResponse<Option<NearestPosition>> {
        debug!(position, "get_nearest: called");
        self.request(|reply| StateCommand::GetNearest { position, reply }).await
    }

    pub async fn nested_match(&self, regex: Regex, from: u64, backward: bool) -> StateResponse<Option<NestedMatch>> {
        debug!(from, backward, "nested_match: called");
        self.request(|reply| StateCommand::NestedMatch {
            regex,
            from,
            backward,
            reply,
        })
        .await
    }

    // === Values ===

    pub async fn set_values(&self, filters: ValueFilters) -> StateResponse<u64> {
        debug!("set_values: called");
        self.request(|reply| StateCommand::SetValues { filters, reply }).await
    }

    pub async fn commit_values(
        &self,
        generation: u64,
        from: u64,
        to: u64,
        rows: Vec<(u64, Vec<(u8, f64)>)>,
    ) -> StateResponse<Option<CommitProgress>> {
        debug!(generation, from, to, "commit_values: called");
        self.request(|reply| StateCommand::CommitValues {
            generation,
            from,
            to,
            rows,
            reply,
        })
        .await
    }

    pub async fn drop_values(&self) -> StateResponse<()> {
        debug!("drop_values: called");
        self.request(|reply| StateCommand::DropValues { reply }).await
    }

    pub async fn get_values(
        &self,
        dataset_len: u16,
        frame: Option<RangeInclusive<u64>>,
    ) -> StateResponse<HashMap<u8, Vec<Point>>> {
        debug!(dataset_len, ?frame, "get_values: called");
        self.request(|reply| StateCommand::GetValues {
            dataset_len,
            frame,
            reply,
        })
        .await
    }

    // === Indexed view ===

    pub async fn set_indexing_mode(&self, mode: Mode) -> StateResponse<()> {
        debug!(?mode, "set_indexing_mode: called");
        self.request(|reply| StateCommand::SetIndexingMode { mode, reply }).await
    }

    pub async fn get_indexed_len(&self) -> StateResponse<u64> {
        self.request(|reply| StateCommand::GetIndexedLen { reply }).await
    }

    pub async fn grab_indexed(&self, start: u64, count: u64) -> StateResponse<Vec<GrabbedElement>> {
        debug!(start, count, "grab_indexed: called");
        self.request(|reply| StateCommand::GrabIndexed { start, count, reply }).await
    }

    pub async fn expand_breadcrumbs(&self, separator: u64, offset: u64, above: bool) -> StateResponse<()> {
        debug!(separator, offset, above, "expand_breadcrumbs: called");
        self.request(|reply| StateCommand::ExpandBreadcrumbs {
            separator,
            offset,
            above,
            reply,
        })
        .await
    }

    pub async fn add_bookmark(&self, row: u64) -> StateResponse<()> {
        debug!(row, "add_bookmark: called");
        self.request(|reply| StateCommand::AddBookmark { row, reply }).await
    }

    pub async fn remove_bookmark(&self, row: u64) -> StateResponse<()> {
        debug!(row, "remove_bookmark: called");
        self.request(|reply| StateCommand::RemoveBookmark { row, reply }).await
    }

    pub async fn set_bookmarks(&self, rows: Vec<u64>) -> StateResponse<()> {
        debug!(count = rows.len(), "set_bookmarks: called");
        self.request(|reply| StateCommand::SetBookmarks { rows, reply }).await
    }

    pub async fn set_indexes(&self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> StateResponse<()> {
        debug!(?nature, ranges = ranges.len(), "set_indexes: called");
        self.request(|reply| StateCommand::SetIndexes { nature, ranges, reply })
            .await
    }

    pub async fn unset_indexes(&self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> StateResponse<()> {
        debug!(?nature, ranges = ranges.len(), "unset_indexes: called");
        self.request(|reply| StateCommand::UnsetIndexes { nature, ranges, reply })
            .await
    }

    pub async fn get_around_indexes(&self, position: u64) -> StateResponse<(Option<u64>, Option<u64>)> {
        debug!(position, "get_around_indexes: called");
        self.request(|reply| StateCommand::GetAroundIndexes { position, reply })
            .await
    }

    pub async fn get_indexed_ranges(&self) -> StateResponse<Vec<RangeInclusive<u64>>> {
        self.request(|reply| StateCommand::GetIndexedRanges { reply }).await
    }

    // === Faults and shutdown ===

    /// Make the actor stop as if it had failed
    pub async fn trigger_error(&self) -> StateResponse<()> {
        debug!("trigger_error: called");
        self.tx
            .send(StateCommand::TriggerError)
            .await
            .map_err(|_| ComputationError::SessionUnavailable)
    }

    /// Shutdown the actor; resolves once it has stopped
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| ComputationError::SessionUnavailable)?;
        reply_rx.await.map_err(|_| ComputationError::SessionUnavailable)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut state: SessionState, mut rx: mpsc::Receiver<StateCommand>) -> Result<(), NativeError> {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::AddSource { alias, reply } => {
                let _ = reply.send(state.add_source(alias));
            }
            StateCommand::GetSources { reply } => {
                let _ = reply.send(Ok(state.sources()));
            }
            StateCommand::Append { entries, reply } => {
                let _ = reply.send(state.append(entries));
            }
            StateCommand::ObserveStarted { reply } => {
                state.observe_started();
                let _ = reply.send(Ok(()));
            }
            StateCommand::ObserveFinished { reply } => {
                state.observe_finished();
                let _ = reply.send(Ok(()));
            }
            StateCommand::FileRead { reply } => {
                state.file_read();
                let _ = reply.send(Ok(()));
            }
            StateCommand::GetStatus { reply } => {
                let _ = reply.send(Ok(state.status()));
            }
            StateCommand::GetStreamLen { reply } => {
                let _ = reply.send(Ok(state.len()));
            }
            StateCommand::Grab { start, count, reply } => {
                let _ = reply.send(state.grab(start, count));
            }
            StateCommand::GrabRanges { ranges, reply } => {
                let _ = reply.send(state.grab_ranges(&ranges));
            }
            StateCommand::GrabRaw { start, count, reply } => {
                let _ = reply.send(state.grab_raw(start, count));
            }
            StateCommand::GetContent { from, count, reply } => {
                let _ = reply.send(Ok(state.content(from, count)));
            }

            StateCommand::AddAttachment { attachment, reply } => {
                state.add_attachment(attachment);
                let _ = reply.send(Ok(()));
            }
            StateCommand::GetAttachments { reply } => {
                let _ = reply.send(Ok(state.attachments()));
            }

            StateCommand::SetSearch { matcher, reply } => {
                let _ = reply.send(state.set_search(matcher));
            }
            StateCommand::CommitSearch {
                generation,
                from,
                to,
                matches,
                reply,
            } => {
                let _ = reply.send(state.commit_search(generation, from, to, matches));
            }
            StateCommand::DropSearch { reply } => {
                let _ = reply.send(state.drop_search());
            }
            StateCommand::GetSearchLen { reply } => {
                let _ = reply.send(Ok(state.search_len()));
            }
            StateCommand::GrabSearch { start, count, reply } => {
                let _ = reply.send(state.grab_search(start, count));
            }
            StateCommand::GetMap {
                dataset_len,
                range,
                reply,
            } => {
                let _ = reply.send(Ok(state.scaled_map(dataset_len, range)));
            }
            StateCommand::GetNearest { position, reply } => {
                let _ = reply.send(Ok(state.nearest(position)));
            }
            StateCommand::NestedMatch {
                regex,
                from,
                backward,
                reply,
            } => {
                let _ = reply.send(Ok(state.nested_match(&regex, from, backward)));
            }

            StateCommand::SetValues { filters, reply } => {
                let _ = reply.send(Ok(state.set_values(filters)));
            }
            StateCommand::CommitValues {
                generation,
                from,
                to,
                rows,
                reply,
            } => {
                let _ = reply.send(Ok(state.commit_values(generation, from, to, rows)));
            }
            StateCommand::DropValues { reply } => {
                state.drop_values();
                let _ = reply.send(Ok(()));
            }
            StateCommand::GetValues {
                dataset_len,
                frame,
                reply,
            } => {
                let _ = reply.send(Ok(state.values(dataset_len, frame)));
            }

            StateCommand::SetIndexingMode { mode, reply } => {
                let _ = reply.send(state.set_indexing_mode(mode));
            }
            StateCommand::GetIndexedLen { reply } => {
                let _ = reply.send(Ok(state.indexed_len()));
            }
            StateCommand::GrabIndexed { start, count, reply } => {
                let _ = reply.send(state.grab_indexed(start, count));
            }
            StateCommand::ExpandBreadcrumbs {
                separator,
                offset,
                above,
                reply,
            } => {
                let _ = reply.send(state.expand_breadcrumbs(separator, offset, above));
            }
            StateCommand::AddBookmark { row, reply } => {
                let _ = reply.send(state.add_bookmark(row));
            }
            StateCommand::RemoveBookmark { row, reply } => {
                let _ = reply.send(state.remove_bookmark(row));
            }
            StateCommand::SetBookmarks { rows, reply } => {
                let _ = reply.send(state.set_bookmarks(rows));
            }
            StateCommand::SetIndexes { nature, ranges, reply } => {
                let _ = reply.send(state.set_indexes(nature, ranges));
            }
            StateCommand::UnsetIndexes { nature, ranges, reply } => {
                let _ = reply.send(state.unset_indexes(nature, ranges));
            }
            StateCommand::GetAroundIndexes { position, reply } => {
                let _ = reply.send(Ok(state.around(position)));
            }
            StateCommand::GetIndexedRanges { reply } => {
                let _ = reply.send(Ok(state.indexed_ranges()));
            }

            StateCommand::TriggerError => {
                error!("StateManager: fault injected, stopping");
                return Err(NativeError::computation("State actor fault injected"));
            }
            StateCommand::Shutdown { reply } => {
                info!("StateManager shutting down");
                state.destroy();
                let _ = reply.send(());
                return Ok(());
            }
        }
    }

    debug!("StateManager actor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchFilter;

    fn spawn() -> (StateManager, JoinHandle<Result<(), NativeError>>, Arc<EventProvider>) {
        let events = Arc::new(EventProvider::new(1024));
        let (manager, join) = StateManager::spawn(Arc::clone(&events), BreadcrumbsConfig::default(), 64);
        (manager, join, events)
    }

    fn entries(count: usize) -> Vec<StreamEntry> {
        (0..count)
            .map(|i| StreamEntry {
                content: format!("entry {}", i),
                raw: format!("entry {}\n", i).into_bytes(),
                source_id: 0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_grab() {
        let (manager, _join, events) = spawn();
        let mut updates = events.stream_updated.subscribe();
        manager.add_source("test").await.unwrap();
        assert_eq!(manager.append(entries(10)).await.unwrap(), 10);
        assert_eq!(updates.recv().await, Some(10));
        let grabbed = manager.grab(8, 2).await.unwrap();
        assert_eq!(grabbed[1].content, "entry 9");
        assert!(matches!(
            manager.grab(9, 2).await,
            Err(ComputationError::Grabbing(_))
        ));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_flow() {
        let (manager, _join, _events) = spawn();
        manager.append(entries(20)).await.unwrap();
        let matcher = FilterMatcher::new(&[SearchFilter::plain("entry 1")]).unwrap();
        let generation = manager.set_search(matcher.clone()).await.unwrap();
        let content = manager.get_content(0, 100).await.unwrap();
        let matches = matcher.match_lines(content.iter().map(|(p, c)| (*p, c.as_str())));
        let progress = manager
            .commit_search(generation, 0, 20, matches)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.found, 11);
        assert!(progress.complete);
        assert_eq!(manager.get_search_len().await.unwrap(), 11);
        manager.drop_search().await.unwrap();
        assert_eq!(manager.get_search_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_then_unavailable() {
        let (manager, join, _events) = spawn();
        manager.shutdown().await.unwrap();
        assert!(join.await.unwrap().is_ok());
        assert!(matches!(
            manager.get_stream_len().await,
            Err(ComputationError::SessionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_trigger_error_stops_actor() {
        let (manager, join, _events) = spawn();
        manager.trigger_error().await.unwrap();
        assert!(join.await.unwrap().is_err());
        assert!(manager.get_stream_len().await.is_err());
    }
}
