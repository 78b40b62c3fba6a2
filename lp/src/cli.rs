//! CLI argument parsing for logparse

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lp")]
#[command(author, version, about = "Render, pack and inspect log record files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Record,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every message of a file
    Render {
        /// File to render
        #[arg(required = true)]
        path: PathBuf,

        /// Input format
        #[arg(short, long, value_enum, default_value = "record")]
        format: Format,

        /// Keep only these ECU ids (record format)
        #[arg(long)]
        ecu: Vec<String>,

        /// Keep only these app ids (record format)
        #[arg(long)]
        app: Vec<String>,

        /// Column separator for output
        #[arg(short, long, default_value = " ")]
        separator: String,
    },

    /// Pack text lines into a record file
    Pack {
        /// Output record file
        #[arg(required = true)]
        out: PathBuf,

        /// Text files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// ECU id written into every record
        #[arg(long, default_value = "ECU")]
        ecu: String,

        /// App id written into every record
        #[arg(long, default_value = "APP")]
        app: String,

        /// Context id written into every record
        #[arg(long, default_value = "CTX")]
        ctx: String,

        /// Timestamp of the first record (unix ms); each next record adds 1
        #[arg(long, default_value_t = 0)]
        start_ms: u64,
    },

    /// List files transferred inside a record file
    Scan {
        /// Record file
        #[arg(required = true)]
        path: PathBuf,

        /// Extract the files into this directory
        #[arg(short, long)]
        extract: Option<PathBuf>,
    },

    /// Per-id statistics of record files
    Stats {
        /// Record files or glob patterns
        #[arg(required = true)]
        paths: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
