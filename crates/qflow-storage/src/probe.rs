//! First-Timestamp Probe with LRU Cache
//!
//! Ordering archive files chronologically needs the timestamp of each file's
//! first record. Probing opens the file and reads exactly one record, which is
//! cheap locally but costs a full object download on S3. Results are memoized
//! per path in a bounded LRU cache.
//!
//! ## How It Works
//!
//! ```text
//! first_timestamp(path)
//!         ↓
//!     CACHE HIT? ────YES──→ return cached timestamp
//!         │
//!         NO
//!         ↓
//! open SegmentReader(path)
//!         ↓
//! read() ──CrcMismatch──→ retry (up to max_try)
//!    │
//!    ├── Record    → cache + return timestamp
//!    ├── Pending/Eof → EmptySegment
//!    └── fatal     → propagate
//! ```
//!
//! A segment's first record never changes once written, so entries stay valid
//! for as long as the file exists. Call [`FirstTimestampCache::invalidate`]
//! after deleting or rewriting a file.
//!
//! ## Usage
//!
//! ```ignore
//! let ts = first_timestamp(&path, backend.as_ref())?;
//!
//! // dedicated cache for a one-off scan
//! let cache = FirstTimestampCache::new(1024);
//! let ts = cache.first_timestamp(&path, backend.as_ref(), 10)?;
//!
//! // cache and retry budget handed to queries and readers
//! let probe = TimestampProbe::new(Arc::new(cache), 10);
//! let files = query_archive_files_with(backend.as_ref(), root, date, &filter, &probe)?;
//! ```

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;
use lru::LruCache;
use qflow_core::Fetch;
use tracing::{debug, warn};

use crate::backend::ArchiveBackend;
use crate::error::{Error, Result};
use crate::reader::RecordReader;
use crate::segment::SegmentReader;

/// Paths remembered by the process-wide cache
pub const DEFAULT_CACHE_CAPACITY: usize = 65536;

/// Checksum failures tolerated before giving up on a file
pub const DEFAULT_MAX_TRY: usize = 100;

lazy_static! {
    static ref GLOBAL_CACHE: Arc<FirstTimestampCache> =
        Arc::new(FirstTimestampCache::new(DEFAULT_CACHE_CAPACITY));
}

/// Bounded map from segment path to the timestamp of its first record
pub struct FirstTimestampCache {
    entries: Mutex<LruCache<String, i64>>,
}

impl FirstTimestampCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The process-wide cache used by [`first_timestamp`]
    pub fn global() -> &'static FirstTimestampCache {
        &GLOBAL_CACHE
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, i64>> {
        // Poisoning cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<i64> {
        self.lock().get(path).copied()
    }

    pub fn insert(&self, path: impl Into<String>, timestamp: i64) {
        self.lock().put(path.into(), timestamp);
    }

    pub fn invalidate(&self, path: &str) {
        self.lock().pop(path);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Timestamp of the first record of `path`, probing the file on a miss.
    pub fn first_timestamp(
        &self,
        path: &str,
        backend: &dyn ArchiveBackend,
        max_try: usize,
    ) -> Result<i64> {
        let key = backend.normpath(path);
        if let Some(ts) = self.get(&key) {
            return Ok(ts);
        }

        let ts = probe_first_timestamp(path, backend, max_try)?;
        self.insert(key, ts);
        Ok(ts)
    }
}

impl std::fmt::Debug for FirstTimestampCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirstTimestampCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A cache paired with the checksum-failure budget used on a miss
#[derive(Debug, Clone)]
pub struct TimestampProbe {
    cache: Arc<FirstTimestampCache>,
    max_try: usize,
}

impl TimestampProbe {
    pub fn new(cache: Arc<FirstTimestampCache>, max_try: usize) -> Self {
        Self { cache, max_try }
    }

    pub fn cache(&self) -> &FirstTimestampCache {
        &self.cache
    }

    pub fn cache_handle(&self) -> Arc<FirstTimestampCache> {
        Arc::clone(&self.cache)
    }

    pub fn max_try(&self) -> usize {
        self.max_try
    }

    pub fn first_timestamp(&self, path: &str, backend: &dyn ArchiveBackend) -> Result<i64> {
        self.cache.first_timestamp(path, backend, self.max_try)
    }
}

/// The global cache with [`DEFAULT_MAX_TRY`]
impl Default for TimestampProbe {
    fn default() -> Self {
        Self::new(Arc::clone(&*GLOBAL_CACHE), DEFAULT_MAX_TRY)
    }
}

/// Timestamp of the first record of `path`, memoized in the global cache.
pub fn first_timestamp(path: &str, backend: &dyn ArchiveBackend) -> Result<i64> {
    GLOBAL_CACHE.first_timestamp(path, backend, DEFAULT_MAX_TRY)
}

/// Read the first record of `path` without consulting any cache.
///
/// Fails with `EmptySegment` when the file holds no complete record and with
/// `NoReadableRecord` when `max_try` consecutive frames fail their checksum.
pub fn probe_first_timestamp(
    path: &str,
    backend: &dyn ArchiveBackend,
    max_try: usize,
) -> Result<i64> {
    let mut reader = SegmentReader::open(backend, path)?;
    let result = read_first(&mut reader, path, max_try);
    reader.close();

    if let Ok(ts) = &result {
        debug!(path = %path, first_timestamp = ts, "Probed segment");
    }
    result
}

fn read_first(reader: &mut SegmentReader, path: &str, max_try: usize) -> Result<i64> {
    let attempts = max_try.max(1);
    for attempt in 0..attempts {
        match reader.read() {
            Ok(Fetch::Record(record)) => return Ok(record.timestamp),
            Ok(Fetch::Pending) | Ok(Fetch::Eof) => {
                return Err(Error::EmptySegment(path.to_string()));
            }
            Err(e) if e.is_crc_mismatch() => {
                warn!(path = %path, attempt = attempt + 1, "Corrupted frame while probing segment");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::NoReadableRecord {
        path: path.to_string(),
        attempts,
    })
}
