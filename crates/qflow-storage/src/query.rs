//! Archive Query
//!
//! Locates archive files by machine, date, queue and topic. Queries only look
//! at paths and at each file's first record; they never scan record content.
//!
//! ## Flow
//!
//! ```text
//! query_archive_files(root, date, filter)
//!     │
//!     ├── iter_dir(root)              machines matching filter.machines
//!     │
//!     └── query_machine_archive_files(root, machine, date, filter)
//!             │
//!             ├── iter_file(root/machine/date)
//!             ├── skip dotfiles
//!             ├── decompose filename  (invalid → warn, skip)
//!             ├── match queue + topic patterns
//!             └── probe first record  (unreadable → warn, skip)
//! ```
//!
//! Both query functions return paths in **lexicographic** order.
//! [`sort_by_timestamp`] orders by first-record timestamp instead, and
//! [`iter_archive_files`] walks day by day yielding each day in that order.
//!
//! First timestamps come from a [`TimestampProbe`]. The plain functions use
//! the process-wide cache; the `_with` variants and
//! [`ArchiveFileIter::with_probe`] take one built from an `ArchiveConfig`.
//!
//! ## Patterns
//!
//! Machine, queue and topic patterns are shell globs (`*`, `?`, `[...]`). An
//! empty pattern list matches everything. A topic pattern may also be a
//! numeric id, which matches the hex topic string `0x%016x`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use glob::Pattern;
use tracing::{debug, warn};

use crate::backend::{join_path, ArchiveBackend};
use crate::error::{Error, Result};
use crate::naming::{archive_dir, ArchiveFileName};
use crate::probe::TimestampProbe;
use crate::time::{date_of, IntoTimestamp};
use crate::topic_map::hex_topic_string;

/// Days past today that [`iter_archive_files`] keeps looking for files
pub const DEFAULT_HORIZON_DAYS: i64 = 2;

/// A topic selector: a glob over topic strings or an exact numeric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    Name(String),
    Id(u64),
}

impl TopicPattern {
    fn glob(&self) -> String {
        match self {
            TopicPattern::Name(name) => name.clone(),
            TopicPattern::Id(id) => hex_topic_string(*id),
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(value: &str) -> Self {
        TopicPattern::Name(value.to_string())
    }
}

impl From<String> for TopicPattern {
    fn from(value: String) -> Self {
        TopicPattern::Name(value)
    }
}

impl From<u64> for TopicPattern {
    fn from(value: u64) -> Self {
        TopicPattern::Id(value)
    }
}

/// Which archive files a query selects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveFilter {
    pub machines: Vec<String>,
    pub queues: Vec<String>,
    pub topics: Vec<TopicPattern>,
}

impl ArchiveFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machine(mut self, pattern: impl Into<String>) -> Self {
        self.machines.push(pattern.into());
        self
    }

    pub fn queue(mut self, pattern: impl Into<String>) -> Self {
        self.queues.push(pattern.into());
        self
    }

    pub fn topic(mut self, pattern: impl Into<TopicPattern>) -> Self {
        self.topics.push(pattern.into());
        self
    }
}

/// Compiled form of a pattern list
struct Matcher {
    patterns: Vec<Pattern>,
}

impl Matcher {
    fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Pattern::new(p).map_err(|e| Error::InvalidPattern {
                    pattern: p.to_string(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn matches(&self, value: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(value))
    }
}

/// Readable archive files of one machine and date, sorted by path.
pub fn query_machine_archive_files(
    backend: &dyn ArchiveBackend,
    root: &str,
    machine: &str,
    date: NaiveDate,
    filter: &ArchiveFilter,
) -> Result<Vec<String>> {
    let queues = Matcher::new(&filter.queues)?;
    let topics = Matcher::new(filter.topics.iter().map(TopicPattern::glob))?;
    let probe = TimestampProbe::default();
    query_machine(backend, &backend.normpath(root), machine, date, &queues, &topics, &probe)
}

fn query_machine(
    backend: &dyn ArchiveBackend,
    root: &str,
    machine: &str,
    date: NaiveDate,
    queues: &Matcher,
    topics: &Matcher,
    probe: &TimestampProbe,
) -> Result<Vec<String>> {
    let dir = archive_dir(root, machine, date);

    let mut files = Vec::new();
    for filename in backend.iter_file(&dir)? {
        if filename.starts_with('.') {
            continue;
        }
        let path = join_path(&dir, &filename);

        let name = match ArchiveFileName::parse(&filename) {
            Ok(name) => name,
            Err(_) => {
                warn!(path = %path, "Invalid archive filename, skipped");
                continue;
            }
        };
        if !queues.matches(&name.queue_name) || !topics.matches(&name.topic_string) {
            continue;
        }

        match probe.first_timestamp(&path, backend) {
            Ok(_) => files.push(path),
            Err(e) if e.is_unreadable_segment() => {
                warn!(path = %path, error = %e, "Archive file seems corrupted, skipped");
            }
            Err(e) => return Err(e),
        }
    }

    files.sort();
    Ok(files)
}

/// Readable archive files of every matching machine on `date`, sorted by
/// path.
pub fn query_archive_files(
    backend: &dyn ArchiveBackend,
    root: &str,
    date: NaiveDate,
    filter: &ArchiveFilter,
) -> Result<Vec<String>> {
    query_archive_files_with(backend, root, date, filter, &TimestampProbe::default())
}

/// [`query_archive_files`] deciding readability with `probe`.
pub fn query_archive_files_with(
    backend: &dyn ArchiveBackend,
    root: &str,
    date: NaiveDate,
    filter: &ArchiveFilter,
    probe: &TimestampProbe,
) -> Result<Vec<String>> {
    let root = backend.normpath(root);
    let machines = Matcher::new(&filter.machines)?;
    let queues = Matcher::new(&filter.queues)?;
    let topics = Matcher::new(filter.topics.iter().map(TopicPattern::glob))?;

    let mut files = Vec::new();
    for machine in backend.iter_dir(&root)? {
        if machines.matches(&machine) {
            files.extend(query_machine(
                backend, &root, &machine, date, &queues, &topics, probe,
            )?);
        }
    }

    files.sort();
    debug!(root = %root, date = %date, count = files.len(), "Queried archive");
    Ok(files)
}

/// Order paths by the timestamp of their first record (ties by path).
///
/// Unreadable files are dropped with a warning, or returned as an error when
/// `skip_error` is false.
pub fn sort_by_timestamp<I, S>(
    paths: I,
    backend: &dyn ArchiveBackend,
    skip_error: bool,
) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    sort_by_timestamp_with(paths, backend, skip_error, &TimestampProbe::default())
}

/// [`sort_by_timestamp`] reading first timestamps through `probe`.
pub fn sort_by_timestamp_with<I, S>(
    paths: I,
    backend: &dyn ArchiveBackend,
    skip_error: bool,
    probe: &TimestampProbe,
) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selected = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match probe.first_timestamp(path, backend) {
            Ok(ts) => selected.push((ts, path.to_string())),
            Err(e) if e.is_unreadable_segment() => {
                warn!(path = %path, error = %e, "Archive file seems corrupted");
                if !skip_error {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }

    selected.sort();
    Ok(selected.into_iter().map(|(_, path)| path).collect())
}

/// Lazily walk the archive day by day starting at the date of
/// `from_timestamp`, yielding each day's files by first timestamp.
pub fn iter_archive_files(
    backend: Arc<dyn ArchiveBackend>,
    root: &str,
    from_timestamp: impl IntoTimestamp,
    filter: ArchiveFilter,
) -> ArchiveFileIter {
    ArchiveFileIter::new(backend, root, from_timestamp.into_timestamp(), filter)
}

/// Pull iterator over archive files in chronological order.
///
/// Stops once the date passes the horizon (`today + 2 days` by default).
/// Restartable only by constructing a new one.
pub struct ArchiveFileIter {
    backend: Arc<dyn ArchiveBackend>,
    root: String,
    filter: ArchiveFilter,
    next_date: Option<NaiveDate>,
    horizon: NaiveDate,
    probe: TimestampProbe,
    pending: VecDeque<String>,
}

impl ArchiveFileIter {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        root: &str,
        from_timestamp: i64,
        filter: ArchiveFilter,
    ) -> Self {
        let root = backend.normpath(root);
        Self {
            backend,
            root,
            filter,
            next_date: Some(date_of(from_timestamp)),
            horizon: default_horizon(DEFAULT_HORIZON_DAYS),
            probe: TimestampProbe::default(),
            pending: VecDeque::new(),
        }
    }

    /// Last date (inclusive) to look at.
    pub fn with_horizon(mut self, horizon: NaiveDate) -> Self {
        self.horizon = horizon;
        self
    }

    /// Look up to `days` past today.
    pub fn with_horizon_days(self, days: i64) -> Self {
        self.with_horizon(default_horizon(days))
    }

    pub fn horizon(&self) -> NaiveDate {
        self.horizon
    }

    pub fn with_probe(mut self, probe: TimestampProbe) -> Self {
        self.probe = probe;
        self
    }

    fn load_day(&mut self, date: NaiveDate) -> Result<()> {
        let backend = self.backend.as_ref();
        let files = query_archive_files_with(backend, &self.root, date, &self.filter, &self.probe)?;
        let sorted = sort_by_timestamp_with(&files, backend, true, &self.probe)?;
        self.pending.extend(sorted);
        Ok(())
    }
}

fn default_horizon(days: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(days)
}

impl Iterator for ArchiveFileIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(path) = self.pending.pop_front() {
                return Some(Ok(path));
            }

            let date = self.next_date.filter(|d| *d <= self.horizon)?;
            self.next_date = date.succ_opt();
            if let Err(e) = self.load_day(date) {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matcher_matches_everything() {
        let matcher = Matcher::new(Vec::<String>::new()).unwrap();
        assert!(matcher.matches("anything"));
    }

    #[test]
    fn test_glob_matching() {
        let matcher = Matcher::new(["*z*", "def*"]).unwrap();
        assert!(matcher.matches("default"));
        assert!(matcher.matches("lazy"));
        assert!(!matcher.matches("other"));
        assert!(!Matcher::new(["de?"]).unwrap().matches("default"));
    }

    #[test]
    fn test_topic_id_pattern_renders_hex() {
        let filter = ArchiveFilter::new().topic(3u64).topic("a*");
        let globs: Vec<String> = filter.topics.iter().map(TopicPattern::glob).collect();
        assert_eq!(globs, vec!["0x0000000000000003", "a*"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let result = Matcher::new(["[unclosed"]);
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }
}
