//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Codec Errors
//! - `Codec`: Anything the record format reports (bad magic, checksum,
//!   invalid frame, JSON payload)
//!
//! ### Backend Errors
//! - `Io`: Local filesystem operation failed
//! - `ObjectStore`: Object store operation failed
//! - `InvalidPath`: Path cannot be addressed by the chosen backend
//!
//! ### Segment Probe Errors
//! - `EmptySegment`: Segment holds no complete record yet
//! - `NoReadableRecord`: Every attempt to read a first record hit corruption
//!
//! ### Naming Errors
//! - `InvalidFilename`: Path does not follow the archive naming convention
//! - `InvalidPattern`: A machine, queue or topic glob does not compile
//!
//! ### Writer Errors
//! - `WriterClosed`: Write attempted on a queue writer after `close()`
//!
//! ## Recovery Policy
//!
//! The query layer treats per-file corruption as "skip this file"; see
//! [`Error::is_unreadable_segment`]. Backend errors always propagate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] qflow_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Empty segment: {0}")]
    EmptySegment(String),

    #[error("No readable record in {path} after {attempts} attempts")]
    NoReadableRecord { path: String, attempts: usize },

    #[error("Invalid archive filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Queue writer {0} is closed")]
    WriterClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when a segment cannot yield a first record because of its own
    /// content (empty, corrupted or not a segment at all).
    pub fn is_unreadable_segment(&self) -> bool {
        match self {
            Error::EmptySegment(_) | Error::NoReadableRecord { .. } => true,
            Error::Codec(err) => !matches!(err, qflow_core::Error::Io(_)),
            _ => false,
        }
    }

    /// True for a checksum failure the reader has already stepped over.
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, Error::Codec(err) if err.is_crc_mismatch())
    }
}
