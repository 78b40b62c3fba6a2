//! Session - one observed stream with its search and indexed view
//!
//! ```text
//!            Session (handle)
//!    ┌────────────┼─────────────┐
//!    ↓            ↓             ↓
//! StateManager  Tracker   EventProvider
//!  (actor)      (actor)    (broadcast)
//!    ↑            ↑
//!    └── operations (tokio tasks, one CancelableTask each)
//! ```
//!
//! A supervisor watches both actors. If one stops on a fault the session
//! emits `SessionError`, cancels its operations and is destroyed.

mod operations;
mod state;
mod tracker;

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use logparse::{Attachment, ParserType, TimestampFormat};

use crate::config::Config;
use crate::error::{ComputationError, ComputationResult, NativeError, NativeErrorKind, Severity};
use crate::events::{AttachmentInfo, EventProvider, SessionEvent};
use crate::indexes::{Mode, Nature};
use crate::search::{
    ExtractedMatchValue, Extractor, FilterMatcher, NearestPosition, NestedMatch, Point, ScaledMap, SearchFilter,
    ValueFilters,
};
use crate::stream::{
    ExportOptions, FileMergeOptions, GrabbedElement, ObserveOptions, ObserveOrigin, ObserveSink, SourceDefinition,
    StreamEntry, StreamStatus, merge_files, observe_source, open_file, open_stream, write_raw, write_rendered,
};
use crate::task::CancelableTask;

pub use operations::{OperationContext, OperationRunner};
pub use state::{CommitProgress, SessionState, StateManager};
pub use tracker::{OperationStat, Tracker};

/// Entries grabbed per step while exporting or merging
const EXPORT_CHUNK: u64 = 10_000;

/// Handle to a running session
///
/// Cheap to clone; every clone talks to the same actors.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    uuid: Uuid,
    runner: OperationRunner,
    /// Cancelled once the session is destroyed or being destroyed
    destroyed: CancellationToken,
    search_task: Mutex<Option<CancelableTask<u64>>>,
    values_task: Mutex<Option<CancelableTask<()>>>,
    /// Owns the attachments folder when none is configured
    _attachments_tmp: Option<tempfile::TempDir>,
}

fn slot<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_error(e: tokio::task::JoinError) -> NativeError {
    NativeError::computation(format!("Worker failed: {}", e))
}

impl Session {
    /// Start a session: spawns the state actor, the tracker and the supervisor
    pub async fn new(config: Config) -> ComputationResult<Self> {
        let uuid = Uuid::now_v7();
        debug!(%uuid, "Session::new: called");
        config
            .validate()
            .map_err(|e| ComputationError::InvalidArgs(e.to_string()))?;
        let config = Arc::new(config);
        let capacity = config.session.channel_capacity;

        let (attachments_dir, attachments_tmp) = match &config.session.attachments_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("logweave-attachments-")
                    .tempdir()
                    .map_err(|_| ComputationError::SessionCreatingFail)?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let events = Arc::new(EventProvider::new(capacity));
        let (state, state_join) = StateManager::spawn(Arc::clone(&events), config.breadcrumbs, capacity);
        let (tracker, tracker_join) = Tracker::spawn(capacity);
        let destroyed = CancellationToken::new();

        tokio::spawn(supervise(
            state.clone(),
            tracker.clone(),
            Arc::clone(&events),
            destroyed.clone(),
            state_join,
            tracker_join,
        ));

        info!(%uuid, "Session created");
        Ok(Self {
            inner: Arc::new(SessionInner {
                uuid,
                runner: OperationRunner {
                    state,
                    tracker,
                    events,
                    config,
                    attachments_dir,
                },
                destroyed,
                search_task: Mutex::new(None),
                values_task: Mutex::new(None),
                _attachments_tmp: attachments_tmp,
            }),
        })
    }

    pub async fn with_defaults() -> ComputationResult<Self> {
        Self::new(Config::default()).await
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn events(&self) -> &EventProvider {
        &self.inner.runner.events
    }

    pub fn config(&self) -> &Config {
        &self.inner.runner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.is_cancelled()
    }

    fn state(&self) -> ComputationResult<&StateManager> {
        if self.is_destroyed() {
            return Err(ComputationError::SessionUnavailable);
        }
        Ok(&self.inner.runner.state)
    }

    fn runner(&self) -> ComputationResult<&OperationRunner> {
        if self.is_destroyed() {
            return Err(ComputationError::SessionUnavailable);
        }
        Ok(&self.inner.runner)
    }

    // === Stream ===

    /// Start reading a file, a list of files or a live stream
    pub fn observe(&self, options: ObserveOptions) -> ComputationResult<CancelableTask<()>> {
        debug!(origin = ?options.origin, "observe: called");
        let runner = self.runner()?;
        options.validate()?;
        Ok(runner.run("observe", move |ctx| async move {
            ctx.state.observe_started().await?;
            let result = observe_origin(&ctx, &options).await;
            if let Err(e) = ctx.state.observe_finished().await {
                debug!(error = %e, "observe: state is gone");
            }
            result
        }))
    }

    /// Observe one file
    pub fn assign(&self, path: impl Into<PathBuf>, parser: ParserType) -> ComputationResult<CancelableTask<()>> {
        self.observe(ObserveOptions::file(path, parser))
    }

    pub async fn grab(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        self.state()?.grab(start, count).await
    }

    pub async fn grab_ranges(&self, ranges: Vec<RangeInclusive<u64>>) -> ComputationResult<Vec<GrabbedElement>> {
        self.state()?.grab_ranges(ranges).await
    }

    /// Write rendered entries of `ranges` to `out`, one per line
    ///
    /// Resolves `false` when the export was interrupted.
    pub fn export(
        &self,
        out: impl Into<PathBuf>,
        ranges: Vec<RangeInclusive<u64>>,
        options: ExportOptions,
    ) -> ComputationResult<CancelableTask<bool>> {
        let out = out.into();
        debug!(out = %out.display(), ranges = ranges.len(), "export: called");
        let runner = self.runner()?;
        check_destination(&out)?;
        let options = options.with_defaults(&runner.config.export);
        Ok(runner.run("export", move |ctx| async move {
            let mut writer = BufWriter::new(std::fs::File::create(&out)?);
            let mut first = true;
            for range in ranges {
                let mut from = *range.start();
                while from <= *range.end() {
                    if ctx.is_cancelled() {
                        writer.flush()?;
                        info!(out = %out.display(), "export: interrupted");
                        return Ok(false);
                    }
                    let count = (*range.end() - from).saturating_add(1).min(EXPORT_CHUNK);
                    let contents: Vec<String> = ctx
                        .state
                        .grab(from, count)
                        .await?
                        .into_iter()
                        .map(|element| element.content)
                        .collect();
                    write_rendered(&mut writer, &contents, &options, first)?;
                    first = false;
                    from += count;
                }
            }
            writer.flush()?;
            Ok(true)
        }))
    }

    /// Write the stored bytes of `ranges` to `out` unchanged
    pub fn export_raw(
        &self,
        out: impl Into<PathBuf>,
        ranges: Vec<RangeInclusive<u64>>,
    ) -> ComputationResult<CancelableTask<bool>> {
        let out = out.into();
        debug!(out = %out.display(), ranges = ranges.len(), "export_raw: called");
        let runner = self.runner()?;
        check_destination(&out)?;
        Ok(runner.run("export_raw", move |ctx| async move {
            let mut writer = BufWriter::new(std::fs::File::create(&out)?);
            for range in ranges {
                let mut from = *range.start();
                while from <= *range.end() {
                    if ctx.is_cancelled() {
                        writer.flush()?;
                        return Ok(false);
                    }
                    let count = (*range.end() - from).saturating_add(1).min(EXPORT_CHUNK);
                    let raws = ctx.state.grab_raw(from, count).await?;
                    write_raw(&mut writer, &raws)?;
                    from += count;
                }
            }
            writer.flush()?;
            Ok(true)
        }))
    }

    pub async fn is_raw_export_available(&self) -> ComputationResult<bool> {
        Ok(self.state()?.get_stream_len().await? > 0)
    }

    /// Merge text files by timestamp into `out` and into the stream
    pub fn merge(
        &self,
        files: Vec<FileMergeOptions>,
        out: impl Into<PathBuf>,
        append: bool,
    ) -> ComputationResult<CancelableTask<()>> {
        let out = out.into();
        debug!(files = files.len(), out = %out.display(), append, "merge: called");
        let runner = self.runner()?;
        if files.is_empty() {
            return Err(ComputationError::InvalidArgs("Nothing to merge".to_string()));
        }
        for file in &files {
            TimestampFormat::new(&file.format)?;
        }
        check_destination(&out)?;
        Ok(runner.run("merge", move |ctx| async move {
            let token = ctx.token.clone();
            let list = files.clone();
            let merged = tokio::task::spawn_blocking(move || merge_files(&list, || token.is_cancelled()))
                .await
                .map_err(join_error)??;
            if ctx.is_cancelled() {
                return Ok(());
            }

            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&out)?;
            let mut writer = BufWriter::new(file);
            for line in &merged {
                writer.write_all(line.line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;

            let mut ids = Vec::with_capacity(files.len());
            for file in &files {
                ids.push(ctx.state.add_source(&file.alias()).await?);
            }
            let mut entries = Vec::new();
            for line in merged {
                let raw = format!("{}\n", line.line).into_bytes();
                entries.push(StreamEntry {
                    content: line.line,
                    raw,
                    source_id: ids[line.file],
                });
                if entries.len() as u64 >= EXPORT_CHUNK {
                    ctx.state.append(std::mem::take(&mut entries)).await?;
                }
            }
            if !entries.is_empty() {
                ctx.state.append(entries).await?;
            }
            ctx.state.file_read().await?;
            Ok(())
        }))
    }

    /// Current entry count
    pub async fn len(&self) -> ComputationResult<u64> {
        self.state()?.get_stream_len().await
    }

    pub async fn get_stream_len(&self) -> ComputationResult<u64> {
        self.len().await
    }

    pub async fn get_sources(&self) -> ComputationResult<Vec<SourceDefinition>> {
        self.state()?.get_sources().await
    }

    pub async fn get_attachments(&self) -> ComputationResult<Vec<AttachmentInfo>> {
        self.state()?.get_attachments().await
    }

    pub async fn stream_status(&self) -> ComputationResult<StreamStatus> {
        if self.is_destroyed() {
            return Ok(StreamStatus::Destroyed);
        }
        self.inner.runner.state.get_status().await
    }

    // === Indexed view ===

    pub async fn set_indexing_mode(&self, mode: Mode) -> ComputationResult<()> {
        self.state()?.set_indexing_mode(mode).await
    }

    pub async fn get_indexed_len(&self) -> ComputationResult<u64> {
        self.state()?.get_indexed_len().await
    }

    pub async fn grab_indexed(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        self.state()?.grab_indexed(start, count).await
    }

    pub async fn expand_breadcrumbs(&self, separator: u64, offset: u64, above: bool) -> ComputationResult<()> {
        self.state()?.expand_breadcrumbs(separator, offset, above).await
    }

    pub async fn add_bookmark(&self, row: u64) -> ComputationResult<()> {
        self.state()?.add_bookmark(row).await
    }

    pub async fn remove_bookmark(&self, row: u64) -> ComputationResult<()> {
        self.state()?.remove_bookmark(row).await
    }

    pub async fn set_bookmarks(&self, rows: Vec<u64>) -> ComputationResult<()> {
        self.state()?.set_bookmarks(rows).await
    }

    pub async fn set_indexes(&self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> ComputationResult<()> {
        self.state()?.set_indexes(nature, ranges).await
    }

    pub async fn unset_indexes(&self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> ComputationResult<()> {
        self.state()?.unset_indexes(nature, ranges).await
    }

    /// Indexed-view indexes strictly before and after `position`
    pub async fn get_around_indexes(&self, position: u64) -> ComputationResult<(Option<u64>, Option<u64>)> {
        self.state()?.get_around_indexes(position).await
    }

    pub async fn get_indexed_ranges(&self) -> ComputationResult<Vec<RangeInclusive<u64>>> {
        self.state()?.get_indexed_ranges().await
    }

    // === Search ===

    /// Replace the active search; resolves with the match count
    pub fn search(&self, filters: Vec<SearchFilter>) -> ComputationResult<CancelableTask<u64>> {
        debug!(filters = filters.len(), "search: called");
        let runner = self.runner()?;
        let matcher = FilterMatcher::new(&filters)?;
        if let Some(previous) = slot(&self.inner.search_task).take() {
            previous.abort();
        }
        let chunk = runner.config.session.search_chunk_lines as u64;
        let task = runner.run("search", move |ctx| async move {
            let generation = ctx.state.set_search(matcher.clone()).await?;
            let mut from = 0u64;
            let mut found = 0u64;
            while !ctx.is_cancelled() {
                let content = ctx.state.get_content(from, chunk).await?;
                let to = from + content.len() as u64;
                let worker = matcher.clone();
                let matches = tokio::task::spawn_blocking(move || {
                    worker.match_lines(content.iter().map(|(position, line)| (*position, line.as_str())))
                })
                .await
                .map_err(join_error)?;
                let Some(progress) = ctx.state.commit_search(generation, from, to, matches).await? else {
                    debug!(generation, "search: superseded");
                    break;
                };
                found = progress.found;
                ctx.progress(to, None);
                if progress.complete {
                    break;
                }
                from = progress.searched_to;
            }
            Ok(found)
        });
        *slot(&self.inner.search_task) = Some(task.clone());
        Ok(task)
    }

    pub async fn drop_search(&self) -> ComputationResult<()> {
        let state = self.state()?;
        if let Some(previous) = slot(&self.inner.search_task).take() {
            previous.abort();
        }
        state.drop_search().await
    }

    pub async fn get_map(&self, dataset_len: u16, range: Option<RangeInclusive<u64>>) -> ComputationResult<ScaledMap> {
        self.state()?.get_map(dataset_len, range).await
    }

    pub async fn grab_search(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        self.state()?.grab_search(start, count).await
    }

    pub async fn get_search_result_len(&self) -> ComputationResult<u64> {
        self.state()?.get_search_len().await
    }

    pub async fn get_nearest_position(&self, position: u64) -> ComputationResult<Option<NearestPosition>> {
        self.state()?.get_nearest(position).await
    }

    /// Collect capture groups of matching lines without touching the search
    pub fn extract(&self, filters: Vec<SearchFilter>) -> ComputationResult<CancelableTask<Vec<ExtractedMatchValue>>> {
        debug!(filters = filters.len(), "extract: called");
        let runner = self.runner()?;
        let extractor = Extractor::new(&filters)?;
        let chunk = runner.config.session.search_chunk_lines as u64;
        Ok(runner.run("extract", move |ctx| async move {
            let mut results = Vec::new();
            let mut from = 0u64;
            while !ctx.is_cancelled() {
                let content = ctx.state.get_content(from, chunk).await?;
                if content.is_empty() {
                    break;
                }
                from += content.len() as u64;
                let worker = extractor.clone();
                let found = tokio::task::spawn_blocking(move || {
                    content
                        .iter()
                        .filter_map(|(position, line)| worker.extract(*position, line))
                        .collect::<Vec<_>>()
                })
                .await
                .map_err(join_error)?;
                results.extend(found);
            }
            Ok(results)
        }))
    }

    /// Collect numeric values captured by `patterns` over the stream
    pub fn search_values(&self, patterns: Vec<String>) -> ComputationResult<CancelableTask<()>> {
        debug!(patterns = patterns.len(), "search_values: called");
        let runner = self.runner()?;
        let filters = ValueFilters::new(&patterns)?;
        if let Some(previous) = slot(&self.inner.values_task).take() {
            previous.abort();
        }
        let chunk = runner.config.session.search_chunk_lines as u64;
        let task = runner.run("search_values", move |ctx| async move {
            let generation = ctx.state.set_values(filters.clone()).await?;
            let mut from = 0u64;
            while !ctx.is_cancelled() {
                let content = ctx.state.get_content(from, chunk).await?;
                let to = from + content.len() as u64;
                let worker = filters.clone();
                let rows = tokio::task::spawn_blocking(move || {
                    content
                        .iter()
                        .filter_map(|(position, line)| {
                            let values = worker.extract(line);
                            (!values.is_empty()).then_some((*position, values))
                        })
                        .collect::<Vec<_>>()
                })
                .await
                .map_err(join_error)?;
                match ctx.state.commit_values(generation, from, to, rows).await? {
                    Some(progress) if !progress.complete => from = progress.searched_to,
                    _ => break,
                }
            }
            Ok(())
        });
        *slot(&self.inner.values_task) = Some(task.clone());
        Ok(task)
    }

    pub async fn drop_search_values(&self) -> ComputationResult<()> {
        let state = self.state()?;
        if let Some(previous) = slot(&self.inner.values_task).take() {
            previous.abort();
        }
        state.drop_values().await
    }

    pub async fn get_values(
        &self,
        dataset_len: u16,
        frame: Option<RangeInclusive<u64>>,
    ) -> ComputationResult<std::collections::HashMap<u8, Vec<Point>>> {
        self.state()?.get_values(dataset_len, frame).await
    }

    /// First match from match index `from` whose content also matches `filter`
    pub async fn search_nested_match(
        &self,
        filter: SearchFilter,
        from: u64,
        backward: bool,
    ) -> ComputationResult<Option<NestedMatch>> {
        let state = self.state()?;
        let regex = filter.compile()?;
        state.nested_match(regex, from, backward).await
    }

    // === Operations ===

    /// Cancel a running operation and wait until it stopped
    ///
    /// Returns false when no such operation runs.
    pub async fn abort(&self, operation: Uuid) -> ComputationResult<bool> {
        debug!(%operation, "abort: called");
        self.runner()?.tracker.cancel_operation(operation).await
    }

    /// Debug operation: resolves after `ms`, or earlier when cancelled unless `ignore_cancel`
    pub fn sleep(&self, ms: u64, ignore_cancel: bool) -> ComputationResult<CancelableTask<()>> {
        debug!(ms, ignore_cancel, "sleep: called");
        let runner = self.runner()?;
        Ok(runner.run("sleep", move |ctx| async move {
            let delay = tokio::time::sleep(Duration::from_millis(ms));
            if ignore_cancel {
                delay.await;
            } else {
                tokio::select! {
                    _ = ctx.token.cancelled() => {}
                    _ = delay => {}
                }
            }
            Ok(())
        }))
    }

    /// Toggle operation statistics and event bookkeeping
    pub async fn set_debug(&self, enabled: bool) -> ComputationResult<()> {
        let runner = self.runner()?;
        runner.events.set_debug(enabled, &self.inner.uuid.to_string());
        runner.tracker.set_debug(enabled).await
    }

    pub async fn get_operations_stat(&self) -> ComputationResult<String> {
        self.runner()?.tracker.get_operations_stat().await
    }

    // === Lifecycle ===

    /// Make the state actor fail
    pub async fn trigger_state_error(&self) -> ComputationResult<()> {
        self.state()?.trigger_error().await
    }

    /// Make the tracker fail
    pub async fn trigger_tracker_error(&self) -> ComputationResult<()> {
        self.runner()?.tracker.trigger_error().await
    }

    /// Cancel every operation, stop the actors and emit `SessionDestroyed`
    pub async fn destroy(&self) -> ComputationResult<()> {
        debug!(uuid = %self.inner.uuid, "destroy: called");
        let runner = self.runner()?;
        self.inner.destroyed.cancel();
        let watchdog = Duration::from_millis(runner.config.session.shutdown_timeout_ms);
        match tokio::time::timeout(watchdog, runner.tracker.cancel_all()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "destroy: tracker unavailable"),
            Err(_) => warn!(?watchdog, "destroy: operations did not stop in time"),
        }
        if let Err(e) = runner.state.shutdown().await {
            debug!(error = %e, "destroy: state already stopped");
        }
        if let Err(e) = runner.tracker.shutdown().await {
            debug!(error = %e, "destroy: tracker already stopped");
        }
        runner.events.emit(SessionEvent::SessionDestroyed);
        info!(uuid = %self.inner.uuid, "Session destroyed");
        Ok(())
    }
}

fn check_destination(out: &Path) -> ComputationResult<()> {
    if out.as_os_str().is_empty() {
        return Err(ComputationError::DestinationPath);
    }
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(ComputationError::IoOperation(format!(
            "Destination folder does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

/// Watch both actors; tear the session down when one of them fails
async fn supervise(
    state: StateManager,
    tracker: Tracker,
    events: Arc<EventProvider>,
    destroyed: CancellationToken,
    state_join: JoinHandle<Result<(), NativeError>>,
    tracker_join: JoinHandle<Result<(), NativeError>>,
) {
    let (failed, outcome) = tokio::select! {
        outcome = state_join => ("state", outcome),
        outcome = tracker_join => ("tracker", outcome),
    };
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => join_error(e),
    };
    if destroyed.is_cancelled() {
        debug!(actor = failed, "supervise: session already destroyed");
        return;
    }
    error!(actor = failed, %error, "Session actor failed");
    destroyed.cancel();
    events.emit(SessionEvent::SessionError { error });
    if let Err(e) = tracker.cancel_all().await {
        warn!(error = %e, "supervise: operations could not be cancelled");
    }
    let _ = state.shutdown().await;
    let _ = tracker.shutdown().await;
    events.emit(SessionEvent::SessionDestroyed);
}

async fn observe_origin(ctx: &OperationContext, options: &ObserveOptions) -> Result<(), NativeError> {
    let chunk_bytes = ctx.config.session.read_chunk_bytes;
    let mut sink = SessionSink { ctx: ctx.clone() };
    match &options.origin {
        ObserveOrigin::File { alias, path } => {
            observe_files(ctx, options, &[(alias.clone(), path.clone())], &mut sink).await
        }
        ObserveOrigin::Concat { files } => observe_files(ctx, options, files, &mut sink).await,
        ObserveOrigin::Stream { alias, transport } => {
            let source_id = ctx.state.add_source(alias).await?;
            let source = open_stream(transport).await?;
            let parser = options.parser.build()?;
            let appended = observe_source(source, parser, source_id, &mut sink, ctx.token.clone(), chunk_bytes).await?;
            info!(%alias, appended, "observe: stream ended");
            Ok(())
        }
    }
}

async fn observe_files(
    ctx: &OperationContext,
    options: &ObserveOptions,
    files: &[(String, PathBuf)],
    sink: &mut SessionSink,
) -> Result<(), NativeError> {
    for (_, path) in files {
        if !path.is_file() {
            return Err(NativeError::new(
                Severity::Error,
                NativeErrorKind::FileNotFound,
                format!("File not found: {}", path.display()),
            ));
        }
    }
    for (alias, path) in files {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let source_id = ctx.state.add_source(alias).await?;
        let source = open_file(path).await?;
        let parser = options.parser.build()?;
        let appended = observe_source(
            source,
            parser,
            source_id,
            sink,
            ctx.token.clone(),
            ctx.config.session.read_chunk_bytes,
        )
        .await?;
        debug!(path = %path.display(), appended, "observe_files: file done");
    }
    if !ctx.is_cancelled() {
        ctx.state.file_read().await?;
    }
    Ok(())
}

/// Commits observed entries and attachments into the session state
struct SessionSink {
    ctx: OperationContext,
}

#[async_trait]
impl ObserveSink for SessionSink {
    async fn commit(&mut self, entries: Vec<StreamEntry>) -> Result<u64, NativeError> {
        Ok(self.ctx.state.append(entries).await?)
    }

    async fn attachment(&mut self, attachment: Attachment) -> Result<(), NativeError> {
        let dir = &self.ctx.attachments_dir;
        tokio::fs::create_dir_all(dir).await?;
        let filepath = logparse::attachment::attachment_path(dir, &attachment.info.name);
        tokio::fs::write(&filepath, &attachment.data).await?;
        let info = AttachmentInfo {
            uuid: Uuid::now_v7(),
            ext: Path::new(&attachment.info.name)
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned()),
            filepath,
            name: attachment.info.name,
            size: attachment.data.len(),
            created: attachment.info.created,
            messages: attachment.info.messages,
        };
        debug!(name = %info.name, size = info.size, "attachment: stored");
        Ok(self.ctx.state.add_attachment(info).await?)
    }
}
