use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser as _;
use colored::*;
use eyre::{Context, Result, eyre};
use log::{debug, info};

use logparse::cli::{Cli, Command, Format};
use logparse::{
    Level, ParserType, Record, RecordParserOptions, RecordWriter, collect_stats, extract_files, parse_buffer,
    scan_contained_files,
};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

/// Expand glob patterns; a pattern without matches is taken as a plain path
fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matched: Vec<PathBuf> = glob::glob(pattern)
            .context(format!("Invalid glob pattern: {}", pattern))?
            .filter_map(|entry| entry.ok())
            .collect();
        if matched.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matched);
        }
    }
    Ok(paths)
}

fn id_filter(ids: Vec<String>) -> Option<Vec<String>> {
    if ids.is_empty() { None } else { Some(ids) }
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    debug!("main: dispatching command {:?}", cli.command);

    match cli.command {
        Command::Render {
            path,
            format,
            ecu,
            app,
            separator,
        } => {
            let parser_type = match format {
                Format::Text => ParserType::Text,
                Format::Record => ParserType::Record(RecordParserOptions {
                    ecu_ids: id_filter(ecu),
                    app_ids: id_filter(app),
                    ..Default::default()
                }),
            };
            let mut parser = parser_type.build()?;
            let bytes = fs::read(&path).context(format!("Failed to read {}", path.display()))?;
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let mut write_error = None;
            parse_buffer(parser.as_mut(), &bytes, true, |item| {
                if let Some(message) = item.message()
                    && write_error.is_none()
                {
                    let line = message.content.replace(logparse::COLUMN_SENTINEL, &separator);
                    if let Err(e) = writeln!(out, "{}", line) {
                        write_error = Some(e);
                    }
                }
            })?;
            if let Some(e) = write_error {
                return Err(e).context("Failed to write output");
            }
            out.flush()?;
        }
        Command::Pack {
            out,
            inputs,
            ecu,
            app,
            ctx,
            start_ms,
        } => {
            let paths = expand_paths(&inputs)?;
            let file = File::create(&out).context(format!("Failed to create {}", out.display()))?;
            let mut writer = RecordWriter::new(BufWriter::new(file));
            let mut count = 0u64;
            for path in &paths {
                let text = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
                for line in text.lines() {
                    writer.write(&Record::log(start_ms + count, &ecu, &app, &ctx, Level::Info, line))?;
                    count += 1;
                }
            }
            let written = writer.written();
            writer.into_inner()?;
            info!("packed {} records from {} files", count, paths.len());
            println!(
                "{} Packed {} records ({} bytes) into {}",
                "✓".green(),
                count,
                written,
                out.display().to_string().cyan()
            );
        }
        Command::Scan { path, extract } => {
            let options = RecordParserOptions::default();
            let files = scan_contained_files(&path, &options, || false)?;
            if files.is_empty() {
                println!("No files found");
            }
            for file in &files {
                println!(
                    "{} {} {}",
                    file.name.yellow(),
                    file.size.to_string().dimmed(),
                    file.created
                );
            }
            if let Some(dir) = extract {
                let written = extract_files(&path, &dir, None, &options, || false)?;
                println!("{} Extracted {} bytes into {}", "✓".green(), written, dir.display());
            }
        }
        Command::Stats { paths, json } => {
            let paths = expand_paths(&paths)?;
            if paths.is_empty() {
                return Err(eyre!("No input files"));
            }
            let stats = collect_stats(&paths, || false)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Records: {}", stats.total);
                for (title, ids) in [("ECU", &stats.ecus), ("APP", &stats.apps), ("CTX", &stats.contexts)] {
                    for (id, entry) in ids {
                        let levels: Vec<String> = entry.levels.iter().map(|(l, c)| format!("{}={}", l, c)).collect();
                        println!("  {} {} {} [{}]", title.dimmed(), id.cyan(), entry.count, levels.join(" "));
                    }
                }
            }
        }
    }

    Ok(())
}
