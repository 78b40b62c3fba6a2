//! Unbound jobs - cancelable work that needs no session
//!
//! Each job runs on the blocking pool, is keyed by its task UUID and emits
//! `Started`/`Stopped` on the jobs event provider.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use logparse::{FileInfo, ParserError, RecordParserOptions, RecordStats, collect_stats, extract_files, scan_contained_files};

use crate::error::{NativeError, NativeErrorKind};
use crate::events::{DEFAULT_CHANNEL_CAPACITY, JobsEvent, JobsEventProvider};
use crate::task::CancelableTask;

/// Bytes inspected by `is_file_binary`
const BINARY_PROBE_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    File,
    Folder,
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntity {
    pub name: String,
    pub fullname: PathBuf,
    pub kind: EntityKind,
    /// Depth below the listed root, starting at 1
    pub depth: usize,
    pub size: Option<u64>,
    pub ext: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldersScanningResult {
    pub list: Vec<FolderEntity>,
    /// The listing stopped at `max_len`
    pub max_len_reached: bool,
}

/// Runs out-of-session jobs
pub struct UnboundJobs {
    events: Arc<JobsEventProvider>,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Default for UnboundJobs {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl UnboundJobs {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(JobsEventProvider::new(capacity)),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn events(&self) -> &JobsEventProvider {
        &self.events
    }

    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs currently running
    pub fn len(&self) -> usize {
        self.running().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel a job; false when it is unknown or already finished
    pub fn cancel_job(&self, uuid: Uuid) -> bool {
        debug!(%uuid, "cancel_job: called");
        match self.running().get(&uuid) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn run<T, F>(&self, name: &'static str, work: F) -> CancelableTask<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(CancellationToken) -> Result<T, NativeError> + Send + 'static,
    {
        let events = Arc::clone(&self.events);
        let running = Arc::clone(&self.running);
        CancelableTask::new(move |handle| async move {
            let uuid = handle.uuid();
            let token = handle.token();
            debug!(%uuid, %name, "run: job started");
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(uuid, token.clone());
            events.emit(JobsEvent::Started { uuid });

            let cancel = token.clone();
            let result = tokio::task::spawn_blocking(move || work(cancel))
                .await
                .map_err(|e| NativeError::computation(format!("Job {} failed: {}", name, e)))
                .and_then(|result| result);

            running.lock().unwrap_or_else(PoisonError::into_inner).remove(&uuid);
            events.emit(JobsEvent::Stopped { uuid });
            match result {
                _ if token.is_cancelled() => handle.cancel(),
                Err(e) if e.kind == NativeErrorKind::Interrupted => handle.cancel(),
                Ok(value) => handle.resolve(value),
                Err(e) => handle.reject(e),
            };
            Ok(())
        })
    }

    /// Files and folders below `paths`, up to `depth` levels and `max_len` entries
    pub fn list_folder_content(
        &self,
        paths: Vec<PathBuf>,
        depth: usize,
        max_len: usize,
        include_files: bool,
        include_folders: bool,
    ) -> CancelableTask<FoldersScanningResult> {
        debug!(paths = paths.len(), depth, max_len, "list_folder_content: called");
        self.run("list_folder_content", move |token| {
            let mut result = FoldersScanningResult::default();
            'roots: for root in &paths {
                for entry in WalkDir::new(root).min_depth(1).max_depth(depth).sort_by_file_name() {
                    if token.is_cancelled() {
                        return Err(interrupted());
                    }
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            debug!(error = %e, "list_folder_content: skipping entry");
                            continue;
                        }
                    };
                    let file_type = entry.file_type();
                    let kind = if file_type.is_dir() {
                        EntityKind::Folder
                    } else {
                        EntityKind::File
                    };
                    if (kind == EntityKind::File && !include_files) || (kind == EntityKind::Folder && !include_folders)
                    {
                        continue;
                    }
                    if result.list.len() >= max_len {
                        result.max_len_reached = true;
                        break 'roots;
                    }
                    let size = match kind {
                        EntityKind::File => entry.metadata().ok().map(|meta| meta.len()),
                        EntityKind::Folder => None,
                    };
                    result.list.push(FolderEntity {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        ext: match kind {
                            EntityKind::File => entry
                                .path()
                                .extension()
                                .map(|ext| ext.to_string_lossy().into_owned()),
                            EntityKind::Folder => None,
                        },
                        depth: entry.depth(),
                        fullname: entry.into_path(),
                        kind,
                        size,
                    });
                }
            }
            info!(found = result.list.len(), "list_folder_content: done");
            Ok(result)
        })
    }

    /// Whether the head of the file looks binary
    pub fn is_file_binary(&self, path: PathBuf) -> CancelableTask<bool> {
        debug!(path = %path.display(), "is_file_binary: called");
        self.run("is_file_binary", move |_| Ok(probe_binary(&path)?))
    }

    /// Per ECU/app/context/level record counts over `paths`
    pub fn record_stats(&self, paths: Vec<PathBuf>) -> CancelableTask<RecordStats> {
        debug!(paths = paths.len(), "record_stats: called");
        self.run("record_stats", move |token| {
            collect_stats(&paths, || token.is_cancelled()).map_err(parser_error)
        })
    }

    /// Files transferred inside a record file
    pub fn scan_attachments(&self, path: PathBuf, options: RecordParserOptions) -> CancelableTask<Vec<FileInfo>> {
        debug!(path = %path.display(), "scan_attachments: called");
        self.run("scan_attachments", move |token| {
            scan_contained_files(&path, &options, || token.is_cancelled()).map_err(parser_error)
        })
    }

    /// Write transferred files to `out_dir`; resolves with the bytes written
    pub fn extract_attachments(
        &self,
        path: PathBuf,
        out_dir: PathBuf,
        names: Option<Vec<String>>,
    ) -> CancelableTask<u64> {
        debug!(path = %path.display(), out_dir = %out_dir.display(), "extract_attachments: called");
        self.run("extract_attachments", move |token| {
            extract_files(
                &path,
                &out_dir,
                names.as_deref(),
                &RecordParserOptions::default(),
                || token.is_cancelled(),
            )
            .map_err(parser_error)
        })
    }
}

fn interrupted() -> NativeError {
    NativeError::from(ParserError::Interrupted)
}

fn parser_error(e: ParserError) -> NativeError {
    NativeError::from(e)
}

/// NUL bytes or invalid UTF-8 in the first bytes mean binary
fn probe_binary(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(BINARY_PROBE_BYTES);
    File::open(path)?
        .take(BINARY_PROBE_BYTES as u64)
        .read_to_end(&mut head)?;
    if head.contains(&0) {
        return Ok(true);
    }
    match std::str::from_utf8(&head) {
        Ok(_) => Ok(false),
        // A char cut by the probe boundary is still text
        Err(e) => Ok(e.error_len().is_some()),
    }
}
