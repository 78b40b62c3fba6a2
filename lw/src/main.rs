//! logweave - CLI entry point
//!
//! Every subcommand runs one short-lived session (or an unbound job) and
//! prints the result.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser as _;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use logparse::{COLUMN_SENTINEL, ParserType, RecordParserOptions};
use logweave::cli::{Cli, Command, Filters, Input, get_log_path};
use logweave::config::Config;
use logweave::{
    EntityKind, ExportOptions, FileMergeOptions, SearchFilter, Session, TaskOutcome, UnboundJobs,
};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Grab { input, start, count } => cmd_grab(config, &input, start, count).await,
        Command::Search { input, filters, limit } => cmd_search(config, &input, &filters, limit).await,
        Command::Map {
            input,
            filters,
            dataset_len,
        } => cmd_map(config, &input, &filters, dataset_len).await,
        Command::Extract { input, filters } => cmd_extract(config, &input, &filters).await,
        Command::Export {
            input,
            out,
            ranges,
            raw,
            columns,
            delimiter,
        } => cmd_export(config, &input, &out, ranges, raw, columns, delimiter).await,
        Command::Merge {
            out,
            files,
            formats,
            offset,
            year,
            append,
        } => cmd_merge(config, &out, files, formats, offset, year, append).await,
        Command::Attachments { file, extract } => cmd_attachments(file, extract).await,
        Command::Stats { files } => cmd_stats(files).await,
        Command::Ls { path, depth } => cmd_ls(path, depth).await,
    }
}

/// Resolved value of a task, or an error naming `what`
fn settled<T>(outcome: TaskOutcome<T>, what: &str) -> Result<T> {
    match outcome {
        TaskOutcome::Resolved(value) => Ok(value),
        TaskOutcome::Rejected(e) => Err(eyre!("{} failed: {}", what, e)),
        TaskOutcome::Canceled => Err(eyre!("{} was canceled", what)),
    }
}

fn parser_type(record: bool) -> ParserType {
    if record {
        ParserType::Record(RecordParserOptions::default())
    } else {
        ParserType::Text
    }
}

fn search_filters(filters: &Filters) -> Vec<SearchFilter> {
    filters
        .patterns
        .iter()
        .map(|pattern| {
            let filter = if filters.regex {
                SearchFilter::regex(pattern)
            } else {
                SearchFilter::plain(pattern)
            };
            filter
                .ignore_case(!filters.case_sensitive)
                .word(filters.word)
                .invert(filters.invert)
        })
        .collect()
}

/// Start a session and observe `input` to its end
async fn open(config: Config, input: &Input) -> Result<Session> {
    debug!(file = %input.file.display(), record = input.record, "open: called");
    let session = Session::new(config).await.context("Failed to create session")?;
    let outcome = session.assign(&input.file, parser_type(input.record))?.await;
    settled(outcome, &format!("Reading {}", input.file.display()))?;
    Ok(session)
}

fn printable(content: &str) -> String {
    content.replace(COLUMN_SENTINEL, " ")
}

async fn cmd_grab(config: Config, input: &Input, start: u64, count: u64) -> Result<()> {
    debug!(start, count, "cmd_grab: called");
    let session = open(config, input).await?;
    let len = session.len().await?;
    let count = count.min(len.saturating_sub(start));
    if count > 0 {
        for element in session.grab(start, count).await? {
            println!("{}\t{}", element.position.to_string().dimmed(), printable(&element.content));
        }
    }
    println!("{} {} entries", "Total:".bold(), len);
    session.destroy().await?;
    Ok(())
}

async fn cmd_search(config: Config, input: &Input, filters: &Filters, limit: u64) -> Result<()> {
    debug!(?filters, limit, "cmd_search: called");
    let session = open(config, input).await?;
    let found = settled(session.search(search_filters(filters))?.await, "Search")?;
    let shown = found.min(limit);
    if shown > 0 {
        for element in session.grab_search(0, shown).await? {
            println!("{}\t{}", element.position.to_string().cyan(), printable(&element.content));
        }
    }
    println!("{} {} of {} entries", "Matches:".bold(), found, session.len().await?);
    session.destroy().await?;
    Ok(())
}

async fn cmd_map(config: Config, input: &Input, filters: &Filters, dataset_len: u16) -> Result<()> {
    debug!(dataset_len, "cmd_map: called");
    let session = open(config, input).await?;
    settled(session.search(search_filters(filters))?.await, "Search")?;
    let map = session.get_map(dataset_len, None).await?;
    for (bucket, counts) in map.iter().enumerate() {
        let cells: Vec<String> = counts
            .iter()
            .map(|(filter, count)| format!("{}={}", filters.patterns[*filter as usize], count))
            .collect();
        println!("{:>5} {}", bucket.to_string().dimmed(), cells.join(" "));
    }
    session.destroy().await?;
    Ok(())
}

async fn cmd_extract(config: Config, input: &Input, filters: &Filters) -> Result<()> {
    debug!("cmd_extract: called");
    let session = open(config, input).await?;
    let extracted = settled(session.extract(search_filters(filters))?.await, "Extract")?;
    for item in &extracted {
        let groups: Vec<String> = item
            .values
            .iter()
            .map(|(filter, values)| format!("[{}] {}", filter, values.join(", ")))
            .collect();
        println!("{}\t{}", item.index.to_string().cyan(), groups.join(" "));
    }
    println!("{} {}", "Extracted:".bold(), extracted.len());
    session.destroy().await?;
    Ok(())
}

async fn cmd_export(
    config: Config,
    input: &Input,
    out: &Path,
    ranges: Vec<std::ops::RangeInclusive<u64>>,
    raw: bool,
    columns: Vec<usize>,
    delimiter: Option<String>,
) -> Result<()> {
    debug!(out = %out.display(), raw, "cmd_export: called");
    let session = open(config, input).await?;
    let len = session.len().await?;
    let ranges = if ranges.is_empty() && len > 0 {
        vec![0..=len - 1]
    } else {
        ranges
    };
    let task = if raw {
        session.export_raw(out, ranges)?
    } else {
        let spliter = (input.record && !columns.is_empty()).then(|| COLUMN_SENTINEL.to_string());
        session.export(
            out,
            ranges,
            ExportOptions {
                columns,
                spliter,
                delimiter,
            },
        )?
    };
    let complete = settled(task.await, "Export")?;
    if !complete {
        return Err(eyre!("Export to {} was interrupted", out.display()));
    }
    println!("{} {}", "Exported:".bold(), out.display());
    session.destroy().await?;
    Ok(())
}

async fn cmd_merge(
    config: Config,
    out: &Path,
    files: Vec<PathBuf>,
    formats: Vec<String>,
    offset: i64,
    year: Option<i32>,
    append: bool,
) -> Result<()> {
    debug!(files = files.len(), "cmd_merge: called");
    if formats.len() != 1 && formats.len() != files.len() {
        return Err(eyre!(
            "Expected one --format or one per --file ({} files, {} formats)",
            files.len(),
            formats.len()
        ));
    }
    let options: Vec<FileMergeOptions> = files
        .iter()
        .enumerate()
        .map(|(i, path)| FileMergeOptions {
            offset_ms: offset,
            year,
            ..FileMergeOptions::new(path, formats.get(i).unwrap_or(&formats[0]).clone())
        })
        .collect();
    let session = Session::new(config).await.context("Failed to create session")?;
    settled(session.merge(options, out, append)?.await, "Merge")?;
    println!("{} {} entries into {}", "Merged:".bold(), session.len().await?, out.display());
    session.destroy().await?;
    Ok(())
}

async fn cmd_attachments(file: PathBuf, extract: Option<PathBuf>) -> Result<()> {
    debug!(file = %file.display(), ?extract, "cmd_attachments: called");
    let jobs = UnboundJobs::default();
    let files = settled(
        jobs.scan_attachments(file.clone(), RecordParserOptions::default()).await,
        "Scan",
    )?;
    for info in &files {
        println!("{}\t{} bytes\t{}", info.name.bold(), info.size, info.created.dimmed());
    }
    if let Some(out_dir) = extract {
        let written = settled(jobs.extract_attachments(file, out_dir.clone(), None).await, "Extract")?;
        println!("{} {} bytes into {}", "Extracted:".bold(), written, out_dir.display());
    }
    Ok(())
}

async fn cmd_stats(files: Vec<PathBuf>) -> Result<()> {
    debug!(files = files.len(), "cmd_stats: called");
    let jobs = UnboundJobs::default();
    let stats = settled(jobs.record_stats(files).await, "Stats")?;
    println!("{} {} records", "Total:".bold(), stats.total);
    for (title, ids) in [("ECUs", &stats.ecus), ("Apps", &stats.apps), ("Contexts", &stats.contexts)] {
        println!("{}", title.bold());
        for (id, counts) in ids {
            let levels: Vec<String> = counts.levels.iter().map(|(l, c)| format!("{}={}", l, c)).collect();
            println!("  {:<6} {:>8}  {}", id, counts.count, levels.join(" ").dimmed());
        }
    }
    Ok(())
}

async fn cmd_ls(path: PathBuf, depth: usize) -> Result<()> {
    debug!(path = %path.display(), depth, "cmd_ls: called");
    let jobs = UnboundJobs::default();
    let result = settled(
        jobs.list_folder_content(vec![path], depth, 10_000, true, true).await,
        "Listing",
    )?;
    for entity in &result.list {
        let indent = "  ".repeat(entity.depth.saturating_sub(1));
        match entity.kind {
            EntityKind::Folder => println!("{}{}/", indent, entity.name.blue().bold()),
            EntityKind::File => {
                let size = entity.size.unwrap_or_default().to_string();
                println!("{}{} {}", indent, entity.name, size.dimmed())
            }
        }
    }
    if result.max_len_reached {
        println!("{}", "(listing truncated)".yellow());
    }
    Ok(())
}
