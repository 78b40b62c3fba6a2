//! Event Logger - persists session events to a JSONL file
//!
//! The EventLogger subscribes to the combined event stream of a session and
//! appends every event, timestamped, as one JSON line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use super::provider::{EventProvider, Subscription};
use super::types::{EventLogEntry, SessionEvent};

/// Appends session events to `path`
pub struct EventLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl EventLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::new: creating logger");
        Self { path, writer: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event, opening the file on first use
    pub fn write_event(&mut self, event: &SessionEvent) -> eyre::Result<()> {
        debug!(event_type = event.event_type(), "EventLogger::write_event");
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
                self.writer.insert(BufWriter::new(file))
            }
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Consume events until the subject closes or the session is destroyed
    pub async fn run(mut self, mut events: Subscription<SessionEvent>) {
        debug!(path = ?self.path, "EventLogger::run: starting event logger");
        while let Some(event) = events.recv().await {
            let destroyed = matches!(event, SessionEvent::SessionDestroyed);
            if let Err(e) = self.write_event(&event) {
                error!(error = %e, "EventLogger: failed to write event");
            }
            if destroyed {
                debug!("EventLogger: session destroyed, shutting down");
                break;
            }
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Read a JSONL event log back; bad lines are skipped
pub fn read_events(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_events: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_events: loaded entries");
    Ok(entries)
}

/// Spawn a logger for `provider` writing to `path`
pub fn spawn_event_logger(provider: &EventProvider, path: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(path);
    let events = provider.all.subscribe();
    tokio::spawn(async move {
        logger.run(events).await;
    })
}
