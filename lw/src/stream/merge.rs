//! Timestamp-ordered merge of text files

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use logparse::TimestampFormat;

use crate::error::{ComputationError, ComputationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMergeOptions {
    pub path: PathBuf,
    /// Added to every timestamp of the file
    #[serde(default)]
    pub offset_ms: i64,
    /// Year for formats that carry none
    pub year: Option<i32>,
    /// Alias of the file's source; the path when unset
    pub tag: Option<String>,
    pub format: String,
}

impl FileMergeOptions {
    pub fn new(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset_ms: 0,
            year: None,
            tag: None,
            format: format.into(),
        }
    }

    pub fn alias(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedLine {
    pub timestamp: i64,
    /// Index of the originating file in the merge list
    pub file: usize,
    pub line: String,
}

/// Read every file and order its lines by timestamp
///
/// A line without a timestamp takes the previous line's; leading lines of a
/// file with no timestamp before them are dropped. Ties keep file order.
pub fn merge_files(files: &[FileMergeOptions], cancel: impl Fn() -> bool) -> ComputationResult<Vec<MergedLine>> {
    debug!(files = files.len(), "merge_files: called");
    if files.is_empty() {
        return Err(ComputationError::InvalidArgs("Nothing to merge".to_string()));
    }
    let formats = files
        .iter()
        .map(|file| TimestampFormat::new(&file.format))
        .collect::<Result<Vec<_>, _>>()?;
    let mut merged = Vec::new();
    for (index, (file, format)) in files.iter().zip(&formats).enumerate() {
        let text = fs::read_to_string(&file.path)?;
        let mut last: Option<i64> = None;
        let mut dropped = 0usize;
        for line in text.lines() {
            if cancel() {
                return Err(ComputationError::Process("merge interrupted".to_string()));
            }
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(ts) = format.extract_ms(line, file.year, file.offset_ms) {
                last = Some(ts);
            }
            match last {
                Some(timestamp) => merged.push(MergedLine {
                    timestamp,
                    file: index,
                    line: line.to_string(),
                }),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!(path = %file.path.display(), dropped, "merge_files: lines before first timestamp dropped");
        }
    }
    merged.sort_by_key(|line| (line.timestamp, line.file));
    info!(lines = merged.len(), "merge_files: merged");
    Ok(merged)
}
