//! Archive lookup commands
//!
//! ## Examples
//!
//! ```bash
//! # Every readable file written on 2017-12-20
//! qflowctl query --date 20171220
//!
//! # One queue on the machines of one rack, oldest first record first
//! qflowctl query --date 20171220 --machine 'rack1-*' --queue default --by-time
//!
//! # Why is this file missing from query results?
//! qflowctl first-timestamp ~/data/flow/m-1/20171220/a.default.20171220-000000Z.gz
//!
//! # What does this path encode?
//! qflowctl inspect ~/data/flow/m-1/20171220/a.default.20171220-000000Z.gz
//! ```

use std::io::Write;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use qflow_storage::{
    backend_for_path, query_archive_files_with, sort_by_timestamp_with, ArchiveFilter,
    ArchivePathEntry,
};
use serde::Serialize;

use crate::config::{Config, OutputFormat};
use crate::format::format_time;

/// Print matching archive paths, one per line.
pub fn handle_query(
    config: &Config,
    date: NaiveDate,
    filter: &ArchiveFilter,
    by_time: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let backend = config.archive.backend()?;
    let root = &config.archive.root_dir;
    let probe = config.archive.probe();

    let mut files = query_archive_files_with(backend.as_ref(), root, date, filter, &probe)
        .with_context(|| format!("Failed to query archive at {}", root))?;
    if by_time {
        files = sort_by_timestamp_with(&files, backend.as_ref(), true, &probe)?;
    }

    for file in files {
        writeln!(out, "{}", file)?;
    }
    Ok(())
}

/// Print `<path>\t<first timestamp>\t<time>` or `<path>\tunreadable: <reason>`.
pub fn handle_first_timestamp(
    config: &Config,
    files: &[String],
    out: &mut dyn Write,
) -> Result<()> {
    let probe = config.archive.probe();
    for file in files {
        let backend = backend_for_path(file)?;
        match probe.first_timestamp(file, backend.as_ref()) {
            Ok(ts) => writeln!(out, "{}\t{}\t{}", file, ts, format_time(ts))?,
            Err(e) if e.is_unreadable_segment() => writeln!(out, "{}\tunreadable: {}", file, e)?,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to probe {}", file));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PathInfo {
    machine: String,
    date: String,
    topic: String,
    queue: String,
    queue_time: String,
    compressed: bool,
}

/// Decompose an archive path into its parts.
pub fn handle_inspect(path: &str, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let entry = ArchivePathEntry::parse(path)?;
    let info = PathInfo {
        machine: entry.machine,
        date: entry.date.format("%Y-%m-%d").to_string(),
        topic: entry.file.topic_string,
        queue: entry.file.queue_name,
        queue_time: entry.file.archive_time.to_rfc3339(),
        compressed: entry.file.compressed,
    };

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &info)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "machine:    {}", info.machine)?;
            writeln!(out, "date:       {}", info.date)?;
            writeln!(out, "topic:      {}", info.topic)?;
            writeln!(out, "queue:      {}", info.queue)?;
            writeln!(out, "queue time: {}", info.queue_time)?;
            writeln!(out, "compressed: {}", info.compressed)?;
        }
    }
    Ok(())
}
