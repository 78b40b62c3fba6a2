//! CLI command definitions and subcommands

use std::ops::RangeInclusive;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::debug;

/// logweave - observe, search and export log streams
#[derive(Parser)]
#[command(
    name = "lw",
    about = "Session-scoped log ingestion, indexing and search",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// File to observe
#[derive(Debug, Args)]
pub struct Input {
    /// Log file
    pub file: PathBuf,

    /// Read the file as records instead of text lines
    #[arg(long)]
    pub record: bool,
}

/// Search filter flags shared by the search-like subcommands
#[derive(Debug, Args)]
pub struct Filters {
    /// Filter value (repeatable)
    #[arg(short = 'f', long = "filter", required = true)]
    pub patterns: Vec<String>,

    /// Treat filters as regular expressions
    #[arg(long)]
    pub regex: bool,

    /// Match whole words only
    #[arg(long)]
    pub word: bool,

    /// Match case
    #[arg(long)]
    pub case_sensitive: bool,

    /// Select lines that do not match
    #[arg(long)]
    pub invert: bool,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print `count` entries from `start`
    Grab {
        #[command(flatten)]
        input: Input,

        /// First position
        #[arg(short, long, default_value = "0")]
        start: u64,

        /// Number of entries
        #[arg(short = 'n', long, default_value = "20")]
        count: u64,
    },

    /// Search a file and print the matches
    Search {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        filters: Filters,

        /// Print at most this many matches
        #[arg(long, default_value = "50")]
        limit: u64,
    },

    /// Print the scaled search map
    Map {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        filters: Filters,

        /// Number of buckets
        #[arg(short, long, default_value = "20")]
        dataset_len: u16,
    },

    /// Print the capture groups of matching lines
    Extract {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        filters: Filters,
    },

    /// Export ranges of a file
    Export {
        #[command(flatten)]
        input: Input,

        /// Output file
        out: PathBuf,

        /// Inclusive range A-B (repeatable); everything when omitted
        #[arg(short, long = "range", value_parser = parse_range)]
        ranges: Vec<RangeInclusive<u64>>,

        /// Write the stored bytes unchanged
        #[arg(long)]
        raw: bool,

        /// Columns to keep, comma separated
        #[arg(long, value_delimiter = ',')]
        columns: Vec<usize>,

        /// Separator written between kept columns
        #[arg(long)]
        delimiter: Option<String>,
    },

    /// Merge text files by timestamp
    Merge {
        /// Output file
        out: PathBuf,

        /// Input file (repeatable)
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Timestamp format; one for all files or one per file
        #[arg(long = "format", required = true)]
        formats: Vec<String>,

        /// Milliseconds added to every timestamp
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: i64,

        /// Year for formats without one
        #[arg(long)]
        year: Option<i32>,

        /// Append to the output instead of replacing it
        #[arg(long)]
        append: bool,
    },

    /// List or extract files transferred inside a record file
    Attachments {
        /// Record file
        file: PathBuf,

        /// Extract into this folder
        #[arg(long)]
        extract: Option<PathBuf>,
    },

    /// Per ECU/app/context counts of record files
    Stats {
        /// Record files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List a folder
    Ls {
        /// Folder to list
        path: PathBuf,

        /// Levels to descend
        #[arg(short, long, default_value = "1")]
        depth: usize,
    },
}

/// Parse `A-B` into an inclusive range
pub fn parse_range(value: &str) -> Result<RangeInclusive<u64>, String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("expected A-B, got '{}'", value))?;
    let start: u64 = start.trim().parse().map_err(|e| format!("bad range start '{}': {}", start, e))?;
    let end: u64 = end.trim().parse().map_err(|e| format!("bad range end '{}': {}", end, e))?;
    if start > end {
        return Err(format!("range start {} is after end {}", start, end));
    }
    Ok(start..=end)
}

/// Get the path to the log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logweave")
        .join("logs")
        .join("logweave.log");
    debug!(?path, "get_log_path: returning path");
    path
}
