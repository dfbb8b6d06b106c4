//! Error Types for the qflow record format
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - Reading or writing the underlying byte stream
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: Segment stream doesn't start with the "QFLW" header
//! - `UnsupportedVersion`: Segment was written by a newer format version
//! - `CrcMismatch`: A complete frame failed its checksum (recoverable, the
//!   frame has already been consumed)
//! - `InvalidFrame`: Frame lengths are inconsistent; the stream cannot be
//!   resynchronized
//!
//! ### Payload Errors
//! - `Json`: Structured payload could not be encoded or decoded
//!
//! ## Usage
//! All functions in this crate return `Result<T>` which is aliased to
//! `Result<T, Error>`, so errors propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("CRC mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the one integrity error a reader can step over.
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, Error::CrcMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
