//! Multi-File Reader
//!
//! Reads a sequence of segment files, already ordered by the timestamp of
//! their first record, as one stream in timestamp order.
//!
//! ## Opening Policy
//!
//! Files are opened only when they could contribute the next record:
//!
//! ```text
//!   path source ──► candidate (path, first_ts) ──► merge of open segments
//!                       │                               │
//!                       │    merge empty, or            │
//!                       └─── merge min ts > first_ts ───┘ open candidate
//! ```
//!
//! The candidate is probed for its first timestamp but not kept open, so the
//! number of open files is the number of segments currently being merged.
//! Candidates that turn out to be empty or corrupted are skipped with a
//! warning. Errors from files that are already being merged propagate.

use std::sync::Arc;

use qflow_core::Fetch;
use tracing::{debug, warn};

use crate::backend::ArchiveBackend;
use crate::error::Result;
use crate::merge::TimestampMergeReader;
use crate::probe::TimestampProbe;
use crate::reader::RecordReader;
use crate::segment::SegmentReader;

/// Paths in ascending first-timestamp order
pub type PathSource = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Timestamp-ordered reader over many segment files
pub struct MultiFileReader {
    paths: PathSource,
    backend: Arc<dyn ArchiveBackend>,
    merge: TimestampMergeReader<SegmentReader>,
    candidate: Option<(String, i64)>,
    probe: TimestampProbe,
    paths_done: bool,
}

impl MultiFileReader {
    pub fn new<I>(paths: I, backend: Arc<dyn ArchiveBackend>) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            paths: Box::new(paths.into_iter()),
            backend,
            merge: TimestampMergeReader::new(),
            candidate: None,
            probe: TimestampProbe::default(),
            paths_done: false,
        }
    }

    /// Read candidate first timestamps through `probe`.
    pub fn with_probe(mut self, probe: TimestampProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Reader over a fixed, already sorted list of paths.
    pub fn from_paths<I, S>(paths: I, backend: Arc<dyn ArchiveBackend>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<Result<String>> = paths.into_iter().map(|p| Ok(p.into())).collect();
        Self::new(paths, backend)
    }

    /// Number of segments currently open
    pub fn open_files(&self) -> usize {
        self.merge.len()
    }

    fn advance_candidate(&mut self) -> Result<()> {
        while self.candidate.is_none() && !self.paths_done {
            let Some(path) = self.paths.next() else {
                self.paths_done = true;
                break;
            };
            let path = path?;

            match self.probe.first_timestamp(&path, self.backend.as_ref()) {
                Ok(ts) => self.candidate = Some((path, ts)),
                Err(e) if e.is_unreadable_segment() => {
                    warn!(path = %path, error = %e, "Archive file seems corrupted, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn open_candidate(&mut self) -> Result<()> {
        if let Some((path, first_ts)) = self.candidate.take() {
            let reader = SegmentReader::open(self.backend.as_ref(), &path)?;
            self.merge.add_reader(reader);
            debug!(
                path = %path,
                first_timestamp = first_ts,
                open_files = self.merge.len(),
                "Opened archive file"
            );
        }
        Ok(())
    }
}

impl RecordReader for MultiFileReader {
    fn peek(&mut self) -> Result<Fetch> {
        loop {
            self.advance_candidate()?;
            let next = self.merge.peek()?;

            let candidate_ts = match &self.candidate {
                Some((_, ts)) => *ts,
                None => return Ok(next),
            };
            match next.timestamp() {
                Some(ts) if ts <= candidate_ts => return Ok(next),
                _ => self.open_candidate()?,
            }
        }
    }

    fn read(&mut self) -> Result<Fetch> {
        match self.peek()? {
            Fetch::Record(_) => self.merge.read(),
            other => Ok(other),
        }
    }

    fn close(&mut self) {
        self.merge.close();
        self.candidate = None;
        self.paths_done = true;
    }
}
