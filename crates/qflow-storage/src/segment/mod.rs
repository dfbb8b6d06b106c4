//! Segment Files
//!
//! A segment is one append-only file of framed records (see
//! `qflow_core::segment` for the byte layout). This module reads and writes
//! segments through an [`ArchiveBackend`](crate::backend::ArchiveBackend).
//!
//! ## Lifecycle
//!
//! ```text
//!   SegmentWriter::new(path)          nothing on disk yet
//!            │ write()
//!            ▼
//!   open handle, write header         only if the file is new or empty
//!            │ write() / flush()
//!            ▼
//!   frames appended                   readers may tail the file here
//!            │ close() / drop
//!            ▼
//!   handle released                   gzip member finished
//! ```
//!
//! A reader opened on a segment that is still being written sees every
//! complete frame and reports `Fetch::Pending` for a trailing partial one.

mod gzip;
pub mod reader;
pub mod writer;

pub use reader::SegmentReader;
pub use writer::SegmentWriter;
