//! Record printing commands
//!
//! Both commands drain whatever is readable right now and stop at the first
//! `Pending`/`Eof`; they do not tail files that are still being written.

use std::io::Write;

use anyhow::{Context, Result};
use qflow_storage::{ArchiveReader, RecordReader};
use tracing::{info, warn};

use crate::commands::{parse_timestamp, FilterArgs};
use crate::config::{Config, OutputFormat};
use crate::format::write_record;

/// Print the records of explicit files in timestamp order.
pub fn handle_cat(
    files: &[String],
    from: Option<&str>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<usize> {
    let mut reader = ArchiveReader::from_files(files, None).context("Failed to open files")?;
    if let Some(from) = from {
        reader = reader.starting_at(parse_timestamp(from)?);
    }
    print_records(reader, format, None, out)
}

/// Replay the configured archive from a point in time.
pub fn handle_replay(
    config: &Config,
    from: &str,
    filter: &FilterArgs,
    limit: Option<usize>,
    out: &mut dyn Write,
) -> Result<usize> {
    let from_timestamp = parse_timestamp(from)?;
    let reader = ArchiveReader::from_config(&config.archive, from_timestamp, filter.to_filter())
        .with_context(|| format!("Failed to open archive at {}", config.archive.root_dir))?;
    print_records(reader, config.output_format, limit, out)
}

fn print_records(
    reader: ArchiveReader,
    format: OutputFormat,
    limit: Option<usize>,
    out: &mut dyn Write,
) -> Result<usize> {
    let mut printed = 0;
    let mut skipped = 0;
    for result in reader.records() {
        if limit.is_some_and(|limit| printed >= limit) {
            break;
        }
        match result {
            Ok(record) => {
                write_record(out, format, &record)?;
                printed += 1;
            }
            Err(e) if e.is_crc_mismatch() => {
                warn!(error = %e, "Skipping corrupted record");
                skipped += 1;
            }
            Err(e) => return Err(e).context("Failed to read archive"),
        }
    }
    out.flush()?;
    info!(printed, skipped, "Finished reading");
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qflow_core::TopicRecord;
    use qflow_storage::{ArchiveFilter, QueueWriter};
    use tempfile::TempDir;

    const STEP: i64 = 60 * 1_000_000_000;

    fn start_ts() -> i64 {
        Utc.with_ymd_and_hms(2017, 12, 20, 23, 0, 0)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap()
    }

    /// 200 records one minute apart over topics 0..4, crossing midnight.
    fn write_archive(temp: &TempDir) -> Vec<String> {
        let root = temp.path().to_string_lossy().into_owned();
        let mut writer = QueueWriter::builder("default")
            .root_dir(root.clone())
            .machine("m-1")
            .build(start_ts())
            .unwrap();
        for i in 0..200i64 {
            let record = TopicRecord::new(
                Some(i),
                i as u64 % 4,
                None,
                start_ts() + i * STEP,
                format!(r#"{{"n": {}}}"#, i),
            );
            writer.write(&record).unwrap();
        }
        writer.close().unwrap();

        let backend = qflow_storage::LocalBackend::new();
        qflow_storage::query_archive_files(
            &backend,
            &root,
            chrono::NaiveDate::from_ymd_opt(2017, 12, 20).unwrap(),
            &ArchiveFilter::new(),
        )
        .unwrap()
    }

    fn lines(out: Vec<u8>) -> Vec<serde_json::Value> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_cat_prints_files_in_order() {
        let temp = TempDir::new().unwrap();
        let files = write_archive(&temp);
        assert_eq!(files.len(), 4);

        let mut out = Vec::new();
        let printed = handle_cat(&files, None, OutputFormat::Json, &mut out).unwrap();
        assert_eq!(printed, 60);

        let records = lines(out);
        assert_eq!(records.len(), 60);
        assert_eq!(records[0]["data"]["n"], 0);
        assert!(records
            .windows(2)
            .all(|w| w[0]["timestamp"].as_i64() < w[1]["timestamp"].as_i64()));
    }

    #[test]
    fn test_cat_from_timestamp() {
        let temp = TempDir::new().unwrap();
        let files = write_archive(&temp);

        let from = (start_ts() + 10 * STEP).to_string();
        let mut out = Vec::new();
        let printed = handle_cat(&files, Some(&from), OutputFormat::Json, &mut out).unwrap();
        assert_eq!(printed, 50);
        assert_eq!(lines(out)[0]["queue_seq"], 10);
    }

    #[test]
    fn test_replay_with_filter_and_limit() {
        let temp = TempDir::new().unwrap();
        write_archive(&temp);
        let config = Config::default()
            .with_overrides(Some(temp.path().to_string_lossy().into_owned()), None)
            .unwrap();

        let filter = FilterArgs {
            topic: vec!["2".to_string()],
            ..Default::default()
        };
        let mut out = Vec::new();
        let printed = handle_replay(&config, "20171220", &filter, None, &mut out).unwrap();
        assert_eq!(printed, 50);
        assert!(lines(out).iter().all(|r| r["topic_id"] == 2));

        let mut out = Vec::new();
        let printed =
            handle_replay(&config, "20171220", &FilterArgs::default(), Some(5), &mut out).unwrap();
        assert_eq!(printed, 5);
        assert_eq!(lines(out)[4]["queue_seq"], 4);
    }

    #[test]
    fn test_replay_rejects_bad_timestamp() {
        let mut out = Vec::new();
        let result = handle_replay(
            &Config::default(),
            "yesterday",
            &FilterArgs::default(),
            None,
            &mut out,
        );
        assert!(result.is_err());
        assert!(out.is_empty());
    }
}
