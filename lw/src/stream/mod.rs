//! The session stream
//!
//! Entries are appended by observers and never move: an entry's position is
//! its index in the sequence. Each entry keeps the raw bytes it was parsed
//! from so it can be exported unchanged.

mod export;
mod merge;
mod observe;
mod source;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::GrabError;

pub use export::{ExportOptions, render_columns, write_raw, write_rendered};
pub use merge::{FileMergeOptions, MergedLine, merge_files};
pub use observe::{ObserveSink, ObservedBatch, observe_source};
pub use source::{ByteSource, ObserveOptions, ObserveOrigin, Transport, open_file, open_stream};

/// An entry as handed out to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabbedElement {
    pub position: u64,
    pub content: String,
    pub source_id: u16,
    /// Natures in the indexed view; empty for plain grabs
    #[serde(default)]
    pub nature: Vec<u8>,
}

/// A registered origin of entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub id: u16,
    pub alias: String,
}

/// What observers append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub content: String,
    pub raw: Vec<u8>,
    pub source_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamStatus {
    #[default]
    Empty,
    Observing,
    Ready,
    Destroyed,
}

#[derive(Debug, Default)]
pub struct Stream {
    entries: Vec<StreamEntry>,
    sources: Vec<SourceDefinition>,
    observers: usize,
    destroyed: bool,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self) -> StreamStatus {
        if self.destroyed {
            StreamStatus::Destroyed
        } else if self.observers > 0 {
            StreamStatus::Observing
        } else if self.entries.is_empty() && self.sources.is_empty() {
            StreamStatus::Empty
        } else {
            StreamStatus::Ready
        }
    }

    pub fn observe_started(&mut self) {
        self.observers += 1;
    }

    pub fn observe_finished(&mut self) {
        self.observers = self.observers.saturating_sub(1);
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    /// Register a source; ids are handed out in registration order
    pub fn add_source(&mut self, alias: impl Into<String>) -> Result<u16, GrabError> {
        let id = u16::try_from(self.sources.len())
            .map_err(|_| GrabError::Unsupported(format!("Too many sources: {}", self.sources.len())))?;
        self.sources.push(SourceDefinition {
            id,
            alias: alias.into(),
        });
        Ok(id)
    }

    pub fn sources(&self) -> &[SourceDefinition] {
        &self.sources
    }

    /// Append a batch; returns the new length
    pub fn append(&mut self, entries: Vec<StreamEntry>) -> u64 {
        self.entries.extend(entries);
        self.len()
    }

    pub fn entry(&self, position: u64) -> Option<&StreamEntry> {
        self.entries.get(usize::try_from(position).ok()?)
    }

    fn checked(&self, start: u64, count: u64) -> Result<std::ops::Range<usize>, GrabError> {
        let len = self.len();
        match start.checked_add(count) {
            Some(end) if count > 0 && end <= len => Ok(start as usize..end as usize),
            _ => Err(GrabError::InvalidRange {
                range: start..start.saturating_add(count),
                context: format!("stream has {} entries", len),
            }),
        }
    }

    fn element(&self, position: usize) -> GrabbedElement {
        let entry = &self.entries[position];
        GrabbedElement {
            position: position as u64,
            content: entry.content.clone(),
            source_id: entry.source_id,
            nature: Vec::new(),
        }
    }

    /// Exactly `count` entries from `start`
    pub fn grab(&self, start: u64, count: u64) -> Result<Vec<GrabbedElement>, GrabError> {
        let range = self.checked(start, count)?;
        Ok(range.map(|position| self.element(position)).collect())
    }

    /// Entries of every range, in the given order
    pub fn grab_ranges(&self, ranges: &[RangeInclusive<u64>]) -> Result<Vec<GrabbedElement>, GrabError> {
        let mut elements = Vec::new();
        for range in ranges {
            if range.start() > range.end() {
                return Err(GrabError::InvalidRange {
                    range: *range.start()..range.end().saturating_add(1),
                    context: "range is reversed".to_string(),
                });
            }
            let count = (range.end() - range.start())
                .checked_add(1)
                .ok_or_else(|| GrabError::InvalidRange {
                    range: *range.start()..u64::MAX,
                    context: format!("stream has {} entries", self.len()),
                })?;
            elements.extend(self.grab(*range.start(), count)?);
        }
        Ok(elements)
    }

    /// Raw bytes of `count` entries from `start`
    pub fn grab_raw(&self, start: u64, count: u64) -> Result<Vec<Vec<u8>>, GrabError> {
        let range = self.checked(start, count)?;
        Ok(self.entries[range].iter().map(|entry| entry.raw.clone()).collect())
    }

    /// `(position, content)` pairs for matching; clamps at the end of the stream
    pub fn content(&self, from: u64, count: u64) -> Vec<(u64, String)> {
        let len = self.len();
        if from >= len {
            return Vec::new();
        }
        let to = from.saturating_add(count).min(len);
        (from..to)
            .map(|position| (position, self.entries[position as usize].content.clone()))
            .collect()
    }
}
