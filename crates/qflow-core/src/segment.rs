//! Segment File Layout
//!
//! A segment file holds the framed records of one topic, for one queue, on one
//! day. It is append-only and can be read while it is still being written.
//!
//! ## Segment File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (8 bytes)                            │
//! │ - Magic bytes: "QFLW" (4 bytes)             │
//! │ - Version: 1 (2 bytes, LE)                  │
//! │ - Reserved (2 bytes)                        │
//! ├─────────────────────────────────────────────┤
//! │ Frame 1                                     │
//! ├─────────────────────────────────────────────┤
//! │ Frame 2                                     │
//! ├─────────────────────────────────────────────┤
//! │ ...                                         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! There is no footer and no index: a segment is valid after every complete
//! frame, which is what lets a reader tail a file that is still growing.
//!
//! ## Compression
//! Compression is a property of the whole file, never of single records.
//! A gzip segment is the same byte stream (header + frames) run through gzip,
//! and carries a `.gz` extension.

use serde::{Deserialize, Serialize};

/// Magic bytes for segment files: "QFLW"
pub const SEGMENT_MAGIC: [u8; 4] = *b"QFLW";

/// Version number for the segment format
pub const SEGMENT_VERSION: u16 = 1;

/// Segment header size (8 bytes)
pub const HEADER_SIZE: usize = 8;

/// File extension marking a gzip segment
pub const GZIP_EXTENSION: &str = ".gz";

/// Compression type for a whole segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Compression implied by a segment path.
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(GZIP_EXTENSION) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    /// Suffix appended to archive filenames.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => GZIP_EXTENSION,
        }
    }
}

/// Encode the segment header.
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&SEGMENT_MAGIC);
    header[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
    header
}

/// Validate a complete segment header.
pub fn check_header(header: &[u8]) -> crate::Result<()> {
    if header.len() < HEADER_SIZE || header[..4] != SEGMENT_MAGIC {
        return Err(crate::Error::InvalidMagic);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != SEGMENT_VERSION {
        return Err(crate::Error::UnsupportedVersion(version));
    }
    Ok(())
}
