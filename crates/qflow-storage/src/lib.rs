//! qflow Storage Layer
//!
//! This crate implements the qflow archive: append-only segment files of
//! timestamped topic records, laid out by machine and date, plus the readers
//! that replay them in timestamp order.
//!
//! ## Archive Layout
//!
//! ```text
//! <root>/
//! └── <machine>/
//!     └── <YYYYMMDD>/
//!         ├── <topic>.<queue>.<YYYYMMDD-HHMMSSZ>.gz
//!         └── ...
//! ```
//!
//! `<root>` is a local directory or an `s3://bucket/prefix` URL.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │  Producers  │
//! └──────┬──────┘
//!        │ TopicRecord
//!        ▼
//! ┌─────────────────┐
//! │  QueueWriter    │  one SegmentWriter per topic, daily rotation
//! └────────┬────────┘
//!          │ segment bytes
//!          ▼
//! ┌─────────────────┐
//! │ ArchiveBackend  │  local filesystem or object store
//! └────────┬────────┘
//!          │ paths + bytes
//!          ▼
//! ┌─────────────────┐
//! │ query / probe   │  machine, date, queue and topic globs
//! └────────┬────────┘
//!          │ paths by first timestamp
//!          ▼
//! ┌─────────────────┐
//! │ ArchiveReader   │  MultiFileReader over TimestampMergeReader
//! └────────┬────────┘
//!          │ records in timestamp order
//!          ▼
//! ┌─────────────┐
//! │  Consumers  │
//! └─────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ### Writing
//! ```ignore
//! use qflow_storage::QueueWriter;
//! use qflow_core::TopicRecord;
//!
//! let mut writer = QueueWriter::builder("default")
//!     .root_dir("~/data/flow")
//!     .build(chrono::Utc::now())?;
//!
//! writer.write(&TopicRecord::new(Some(0), 42, None, now_nanos(), "tick"))?;
//! writer.close()?;
//! ```
//!
//! ### Reading
//! ```ignore
//! use qflow_storage::{ArchiveFilter, ArchiveReader, RecordReader};
//!
//! let filter = ArchiveFilter::new().queue("default");
//! let reader = ArchiveReader::from_archive(from_ts, filter, "~/data/flow", None)?;
//! for record in reader.records() {
//!     println!("{:?}", record?);
//! }
//! ```
//!
//! ## Tailing
//!
//! Readers never block. When a writer is mid-append, readers answer
//! `Fetch::Pending`; polling again later returns the completed record.

pub mod archive_reader;
pub mod backend;
pub mod config;
pub mod error;
pub mod merge;
pub mod multi_file;
pub mod naming;
pub mod probe;
pub mod query;
pub mod queue_writer;
pub mod reader;
pub mod segment;
pub mod time;
pub mod topic_map;

pub use archive_reader::ArchiveReader;
pub use backend::{backend_for_path, ArchiveBackend, BackendKind, LocalBackend, ObjectStoreBackend};
pub use config::ArchiveConfig;
pub use error::{Error, Result};
pub use merge::TimestampMergeReader;
pub use multi_file::MultiFileReader;
pub use naming::{archive_filename, ArchiveFileName, ArchivePathEntry};
pub use probe::{first_timestamp, FirstTimestampCache, TimestampProbe};
pub use query::{
    iter_archive_files, query_archive_files, query_archive_files_with, query_machine_archive_files,
    sort_by_timestamp, sort_by_timestamp_with, ArchiveFileIter, ArchiveFilter, TopicPattern,
};
pub use queue_writer::{ArchiveWriter, QueueWriter, QueueWriterBuilder};
pub use reader::{RecordReader, Records};
pub use segment::{SegmentReader, SegmentWriter};
pub use time::IntoTimestamp;
pub use topic_map::{HexTopicMap, StaticTopicMap, TopicMap};
