//! Archive Naming Convention
//!
//! Archive files are located purely by path:
//!
//! ```text
//! <root>/<machine>/<YYYYMMDD>/<topic_string>.<queue_name>.<YYYYMMDD-HHMMSSZ>[.gz]
//!          │          │              │            │              │
//!          │          │              │            │              └─ queue time (UTC)
//!          │          │              │            └─ writer queue
//!          │          │              └─ topic registry string (may contain dots)
//!          │          └─ archive date (UTC)
//!          └─ writing host
//! ```
//!
//! Filenames are split on their last two dots, so the topic string may itself
//! contain dots but the queue name may not. The queue time must be exactly
//! `YYYYMMDD-HHMMSSZ`; offsets other than `Z` are rejected.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use qflow_core::segment::GZIP_EXTENSION;
use qflow_core::Compression;

use crate::backend::join_path;
use crate::error::{Error, Result};
use crate::time::{archive_time_str, date_str, ARCHIVE_TIME_FORMAT, DATE_FORMAT};

const ARCHIVE_TIME_LEN: usize = 16;
const DATE_LEN: usize = 8;

/// The parts encoded in an archive filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFileName {
    pub topic_string: String,
    pub queue_name: String,
    pub archive_time: DateTime<Utc>,
    pub compressed: bool,
}

impl ArchiveFileName {
    pub fn new(
        topic_string: impl Into<String>,
        queue_name: impl Into<String>,
        archive_time: DateTime<Utc>,
        compression: Compression,
    ) -> Self {
        Self {
            topic_string: topic_string.into(),
            queue_name: queue_name.into(),
            archive_time,
            compressed: compression == Compression::Gzip,
        }
    }

    /// Split a bare filename into its parts.
    pub fn parse(filename: &str) -> Result<Self> {
        let invalid = || Error::InvalidFilename(filename.to_string());

        let (stem, compressed) = match filename.strip_suffix(GZIP_EXTENSION) {
            Some(stem) => (stem, true),
            None => (filename, false),
        };

        let (rest, time_str) = stem.rsplit_once('.').ok_or_else(invalid)?;
        let archive_time = parse_archive_time(time_str).ok_or_else(invalid)?;
        let (topic_string, queue_name) = rest.rsplit_once('.').ok_or_else(invalid)?;

        Ok(Self {
            topic_string: topic_string.to_string(),
            queue_name: queue_name.to_string(),
            archive_time,
            compressed,
        })
    }

    pub fn compression(&self) -> Compression {
        if self.compressed {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

impl std::fmt::Display for ArchiveFileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}{}",
            self.topic_string,
            self.queue_name,
            archive_time_str(self.archive_time),
            self.compression().extension()
        )
    }
}

/// A fully decomposed archive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePathEntry {
    pub machine: String,
    pub date: NaiveDate,
    pub file: ArchiveFileName,
}

impl ArchivePathEntry {
    /// Decompose `.../<machine>/<YYYYMMDD>/<filename>`.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || Error::InvalidFilename(path.to_string());

        let mut parts = path.trim_end_matches('/').rsplit('/');
        let filename = parts.next().ok_or_else(invalid)?;
        let date = parts.next().and_then(parse_date).ok_or_else(invalid)?;
        let machine = parts.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            machine: machine.to_string(),
            date,
            file: ArchiveFileName::parse(filename)?,
        })
    }
}

/// `<topic_string>.<queue_name>.<YYYYMMDD-HHMMSSZ>[.gz]`
pub fn archive_filename(
    topic_string: &str,
    queue_name: &str,
    archive_time: DateTime<Utc>,
    compression: Compression,
) -> String {
    ArchiveFileName::new(topic_string, queue_name, archive_time, compression).to_string()
}

/// `<root>/<machine>/<YYYYMMDD>`
pub fn archive_dir(root: &str, machine: &str, date: NaiveDate) -> String {
    join_path(&join_path(root, machine), &date_str(date))
}

/// Strict `YYYYMMDD-HHMMSSZ` parse, UTC only.
pub fn parse_archive_time(s: &str) -> Option<DateTime<Utc>> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == ARCHIVE_TIME_LEN
        && bytes[8] == b'-'
        && bytes[15] == b'Z'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..15].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(s, ARCHIVE_TIME_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Strict `YYYYMMDD` parse.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != DATE_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}
