//! Archive Reader
//!
//! The read-side entry point. Replays records in timestamp order either from
//! an explicit list of files or from the archive directory tree, starting at
//! a given timestamp.
//!
//! ## Usage
//!
//! ```ignore
//! use qflow_storage::{ArchiveFilter, ArchiveReader, RecordReader};
//!
//! // Everything the "default" queue wrote since midnight
//! let filter = ArchiveFilter::new().queue("default");
//! let mut reader = ArchiveReader::from_archive(midnight, filter, "~/data/flow", None)?;
//! while let Fetch::Record(record) = reader.read()? {
//!     handle(record);
//! }
//!
//! // A handful of files picked by hand
//! let reader = ArchiveReader::from_files(&paths, None)?;
//! ```
//!
//! Records older than the start timestamp are skipped once, on the first
//! `peek` or `read`. A caller that sees `Eof` can keep polling to tail files
//! that are still being written.

use std::sync::Arc;

use qflow_core::Fetch;
use tracing::debug;

use crate::backend::{backend_for_path, ArchiveBackend, BackendKind, LocalBackend};
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::multi_file::MultiFileReader;
use crate::query::{sort_by_timestamp, ArchiveFileIter, ArchiveFilter};
use crate::reader::RecordReader;
use crate::time::IntoTimestamp;

/// Timestamp-ordered reader over archive files
pub struct ArchiveReader {
    reader: MultiFileReader,
    from_timestamp: i64,
    skipped: bool,
}

impl ArchiveReader {
    /// Read `reader` starting at `from_timestamp`.
    pub fn new(reader: MultiFileReader, from_timestamp: impl IntoTimestamp) -> Self {
        Self {
            reader,
            from_timestamp: from_timestamp.into_timestamp(),
            skipped: false,
        }
    }

    /// Read explicit files, ordered by their first record.
    ///
    /// Without a backend, one is chosen from the paths; they must then all
    /// live on the same kind of storage. Unreadable files are dropped.
    pub fn from_files<I, S>(paths: I, backend: Option<Arc<dyn ArchiveBackend>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: Vec<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        let backend = match backend {
            Some(backend) => backend,
            None => infer_backend(&paths)?,
        };

        let sorted = sort_by_timestamp(&paths, backend.as_ref(), true)?;
        debug!(requested = paths.len(), readable = sorted.len(), "Reading archive files");
        Ok(Self::new(MultiFileReader::from_paths(sorted, backend), i64::MIN))
    }

    /// Replay the archive under `root` from `from_timestamp` on.
    pub fn from_archive(
        from_timestamp: impl IntoTimestamp,
        filter: ArchiveFilter,
        root: &str,
        backend: Option<Arc<dyn ArchiveBackend>>,
    ) -> Result<Self> {
        let backend = match backend {
            Some(backend) => backend,
            None => backend_for_path(root)?,
        };
        let from_timestamp = from_timestamp.into_timestamp();
        let files = ArchiveFileIter::new(Arc::clone(&backend), root, from_timestamp, filter);
        Ok(Self::new(MultiFileReader::new(files, backend), from_timestamp))
    }

    /// Replay the archive described by `config`, probing files with its
    /// cache size and retry budget.
    pub fn from_config(
        config: &ArchiveConfig,
        from_timestamp: impl IntoTimestamp,
        filter: ArchiveFilter,
    ) -> Result<Self> {
        config.validate()?;
        let backend = config.backend()?;
        let probe = config.probe();
        let from_timestamp = from_timestamp.into_timestamp();
        let files =
            ArchiveFileIter::new(Arc::clone(&backend), &config.root_dir, from_timestamp, filter)
                .with_horizon_days(config.horizon_days)
                .with_probe(probe.clone());
        let reader = MultiFileReader::new(files, backend).with_probe(probe);
        Ok(Self::new(reader, from_timestamp))
    }

    /// Skip records older than `from_timestamp` before the next record.
    pub fn starting_at(mut self, from_timestamp: impl IntoTimestamp) -> Self {
        self.from_timestamp = from_timestamp.into_timestamp();
        self.skipped = false;
        self
    }

    pub fn from_timestamp(&self) -> i64 {
        self.from_timestamp
    }

    fn skip_to_start(&mut self) -> Result<()> {
        while !self.skipped {
            match self.reader.peek()? {
                Fetch::Record(record) if record.timestamp < self.from_timestamp => {
                    self.reader.read()?;
                }
                Fetch::Record(_) => self.skipped = true,
                // Nothing at or past the start yet; keep skipping on later calls
                Fetch::Pending | Fetch::Eof => break,
            }
        }
        Ok(())
    }
}

fn infer_backend(paths: &[String]) -> Result<Arc<dyn ArchiveBackend>> {
    let Some(first) = paths.first() else {
        return Ok(Arc::new(LocalBackend::new()));
    };

    let kind = BackendKind::of_path(first);
    if paths.iter().any(|p| BackendKind::of_path(p) != kind) {
        return Err(Error::InvalidPath(
            "archive files span more than one storage backend".to_string(),
        ));
    }
    if kind == BackendKind::ObjectStore {
        let bucket = s3_bucket(first);
        if paths.iter().any(|p| s3_bucket(p) != bucket) {
            return Err(Error::InvalidPath(
                "archive files span more than one bucket".to_string(),
            ));
        }
    }
    backend_for_path(first)
}

fn s3_bucket(path: &str) -> &str {
    path.split('/').nth(2).unwrap_or("")
}

impl RecordReader for ArchiveReader {
    fn peek(&mut self) -> Result<Fetch> {
        self.skip_to_start()?;
        self.reader.peek()
    }

    fn read(&mut self) -> Result<Fetch> {
        self.skip_to_start()?;
        self.reader.read()
    }

    fn close(&mut self) {
        self.reader.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_writer::QueueWriter;
    use crate::time::datetime_from_nanos;
    use crate::backend::join_path;
    use crate::query::query_archive_files_with;
    use chrono::{Duration, NaiveDate, Utc};
    use qflow_core::codec::frame_bytes;
    use qflow_core::segment::encode_header;
    use qflow_core::TopicRecord;
    use tempfile::TempDir;

    const TOPICS: u64 = 19;
    const RECORDS: i64 = 1000;
    const STEP: i64 = 10 * 60 * 1_000_000_000;

    fn root(temp: &TempDir) -> String {
        temp.path().to_string_lossy().into_owned()
    }

    /// Write `RECORDS` records over `TOPICS` topics, ten minutes apart.
    fn write_archive(temp: &TempDir, start: i64) {
        let mut writer = QueueWriter::builder("default")
            .root_dir(root(temp))
            .machine("machine-1")
            .build(datetime_from_nanos(start))
            .unwrap();
        for i in 0..RECORDS {
            let data = format!("record-{}", i);
            let record = TopicRecord::new(Some(i), i as u64 % TOPICS, None, start + i * STEP, data);
            writer.write(&record).unwrap();
        }
        writer.close().unwrap();
    }

    fn read_all(reader: ArchiveReader) -> Vec<TopicRecord> {
        reader.records().map(|r| r.unwrap()).collect()
    }

    fn start_ts() -> i64 {
        (Utc::now() - Duration::days(30)).into_timestamp()
    }

    #[test]
    fn test_write_read_archive() {
        let temp = TempDir::new().unwrap();
        let start = start_ts();
        write_archive(&temp, start);

        let reader = ArchiveReader::from_archive(start, ArchiveFilter::new(), &root(&temp), None)
            .unwrap();
        let records = read_all(reader);

        assert_eq!(records.len(), RECORDS as usize);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.queue_seq, Some(i as i64));
            assert_eq!(record.timestamp, start + i as i64 * STEP);
        }
    }

    #[test]
    fn test_skip_to_timestamp() {
        let temp = TempDir::new().unwrap();
        let start = start_ts();
        write_archive(&temp, start);

        let from = start + 500 * STEP + 1;
        let reader = ArchiveReader::from_archive(from, ArchiveFilter::new(), &root(&temp), None)
            .unwrap();
        let records = read_all(reader);

        assert_eq!(records.len(), 499);
        assert_eq!(records[0].queue_seq, Some(501));
        assert!(records.iter().all(|r| r.timestamp >= from));
    }

    #[test]
    fn test_topic_filter() {
        let temp = TempDir::new().unwrap();
        let start = start_ts();
        write_archive(&temp, start);

        let filter = ArchiveFilter::new().topic(3u64);
        let reader = ArchiveReader::from_archive(start, filter, &root(&temp), None).unwrap();
        let records = read_all(reader);

        assert_eq!(records.len(), 53);
        assert!(records.iter().all(|r| r.topic_id == 3));
        assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_from_files_sorts_by_first_timestamp() {
        let temp = TempDir::new().unwrap();
        let start = start_ts();
        write_archive(&temp, start);

        let backend: Arc<dyn ArchiveBackend> = Arc::new(LocalBackend::new());
        let mut paths = Vec::new();
        for day in 0..=8 {
            let date = crate::time::date_of(start) + Duration::days(day);
            paths.extend(
                crate::query::query_archive_files(
                    backend.as_ref(),
                    &root(&temp),
                    date,
                    &ArchiveFilter::new(),
                )
                .unwrap(),
            );
        }
        paths.reverse();

        let mut reader = ArchiveReader::from_files(&paths, None).unwrap();
        assert_eq!(reader.from_timestamp(), i64::MIN);
        assert_eq!(reader.peek().unwrap().timestamp(), Some(start));

        let records = read_all(reader);
        assert_eq!(records.len(), RECORDS as usize);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let reader = ArchiveReader::from_files(&paths, Some(backend))
            .unwrap()
            .starting_at(start + 10 * STEP);
        let records = read_all(reader);
        assert_eq!(records.len(), RECORDS as usize - 10);
        assert_eq!(records[0].queue_seq, Some(10));
    }

    #[test]
    fn test_from_files_rejects_mixed_backends() {
        let paths = ["/tmp/a", "s3://bucket/b"];
        assert!(matches!(
            ArchiveReader::from_files(paths, None),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_missing_archive_is_empty() {
        let temp = TempDir::new().unwrap();
        let from = NaiveDate::from_ymd_opt(2017, 12, 1).unwrap();
        let mut reader = ArchiveReader::from_config(
            &ArchiveConfig {
                root_dir: root(&temp),
                horizon_days: 0,
                ..Default::default()
            },
            from,
            ArchiveFilter::new(),
        )
        .unwrap();
        assert_eq!(reader.read().unwrap(), Fetch::Eof);
    }

    /// A file whose first frame fails its checksum, then one good record
    fn write_damaged_head(temp: &TempDir, day: NaiveDate) -> (String, i64) {
        let dir = crate::naming::archive_dir(&root(temp), "machine-1", day);
        std::fs::create_dir_all(&dir).unwrap();
        let path = join_path(&dir, &format!("a.default.{}-000000Z", day.format("%Y%m%d")));
        let ts = day.into_timestamp();

        let mut damaged = frame_bytes(&TopicRecord::new(None, 1, Some(0), ts, "bad")).unwrap();
        let last = damaged.len() - 1;
        damaged[last] ^= 0xff;
        let good = frame_bytes(&TopicRecord::new(None, 1, Some(1), ts + 1, "good")).unwrap();

        let mut bytes = encode_header().to_vec();
        bytes.extend_from_slice(&damaged);
        bytes.extend_from_slice(&good);
        std::fs::write(&path, bytes).unwrap();
        (path, ts)
    }

    #[test]
    fn test_config_max_try_decides_readability() {
        let temp = TempDir::new().unwrap();
        let day = Utc::now().date_naive() - Duration::days(1);
        let (path, ts) = write_damaged_head(&temp, day);
        let backend = LocalBackend::new();

        let strict = ArchiveConfig {
            root_dir: root(&temp),
            first_timestamp_cache_capacity: 16,
            first_timestamp_max_try: 1,
            ..Default::default()
        };
        let files = query_archive_files_with(
            &backend,
            &strict.root_dir,
            day,
            &ArchiveFilter::new(),
            &strict.probe(),
        )
        .unwrap();
        assert!(files.is_empty());
        let reader = ArchiveReader::from_config(&strict, day, ArchiveFilter::new()).unwrap();
        assert!(read_all(reader).is_empty());

        let lenient = ArchiveConfig {
            root_dir: root(&temp),
            first_timestamp_cache_capacity: 16,
            ..Default::default()
        };
        let files = query_archive_files_with(
            &backend,
            &lenient.root_dir,
            day,
            &ArchiveFilter::new(),
            &lenient.probe(),
        )
        .unwrap();
        assert_eq!(files, vec![path]);

        let reader = ArchiveReader::from_config(&lenient, day, ArchiveFilter::new()).unwrap();
        let timestamps: Vec<i64> = reader
            .records()
            .filter_map(|r| r.ok())
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(timestamps, vec![ts + 1]);
    }
}
