//! Queue Writer - Fans One Record Queue Out Into Per-Topic Segments
//!
//! A queue is a single producer's stream of records across many topics.
//! `QueueWriter` keeps one `SegmentWriter` per topic and rotates all of them
//! at UTC day boundaries.
//!
//! ## Layout
//!
//! ```text
//! queue "md", queue time 2017-12-21 09:24:15Z, machine "host-1"
//!
//! <root>/host-1/20171221/0x0000000000000001.md.20171221-092415Z.gz
//! <root>/host-1/20171221/0x0000000000000002.md.20171221-092415Z.gz
//!
//! first record at or after 2017-12-22 00:00:00Z → rotate:
//!
//! <root>/host-1/20171222/0x0000000000000001.md.20171222-000000Z.gz
//! ```
//!
//! ## States
//!
//! - **Open**: queue time set, rotation boundary = `floor(queue_time, day) + 1 day`
//! - **Closed**: after `close()`; writes fail until `reset_queue()`
//!
//! Per-topic writers, their directories and their files are created lazily on
//! the first record for that topic.
//!
//! ## Example Usage
//!
//! ```ignore
//! let mut writer = QueueWriter::builder("md")
//!     .machine("host-1")
//!     .root_dir("/data/flow")
//!     .build(Utc::now())?;
//!
//! writer.write(&TopicRecord::new(Some(0), 1, None, ts, b"tick"))?;
//! writer.flush()?;
//! writer.close()?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use qflow_core::{Compression, TopicRecord};
use tracing::{debug, info, warn};

use crate::backend::{backend_for_path, join_path, ArchiveBackend};
use crate::config::{default_machine, ArchiveConfig};
use crate::error::{Error, Result};
use crate::naming::{archive_dir, archive_filename};
use crate::segment::SegmentWriter;
use crate::time::{datetime_from_nanos, floor_to_day, IntoTimestamp};
use crate::topic_map::{HexTopicMap, TopicMap};

/// Same writer under the name used by archive producers
pub type ArchiveWriter = QueueWriter;

#[derive(Debug, Clone, Copy)]
struct QueueState {
    queue_time: DateTime<Utc>,
    rotate_at: i64,
}

impl QueueState {
    fn new(queue_time: i64) -> Self {
        // Filenames have second resolution
        let queue_time = datetime_from_nanos(queue_time);
        let queue_time = queue_time.with_nanosecond(0).unwrap_or(queue_time);
        let next_day = floor_to_day(queue_time.into_timestamp()) + Duration::days(1);
        Self {
            queue_time,
            rotate_at: next_day.into_timestamp(),
        }
    }
}

/// Builder for [`QueueWriter`]
pub struct QueueWriterBuilder {
    queue_name: String,
    machine: Option<String>,
    root_dir: String,
    compression: Compression,
    topic_map: Box<dyn TopicMap>,
    backend: Option<Arc<dyn ArchiveBackend>>,
}

impl QueueWriterBuilder {
    fn new(queue_name: impl Into<String>) -> Self {
        let defaults = ArchiveConfig::default();
        Self {
            queue_name: queue_name.into(),
            machine: defaults.machine,
            root_dir: defaults.root_dir,
            compression: defaults.compression,
            topic_map: Box::new(HexTopicMap),
            backend: None,
        }
    }

    /// Take machine, root directory and compression from `config`.
    pub fn config(mut self, config: &ArchiveConfig) -> Self {
        self.machine = config.machine.clone();
        self.root_dir = config.root_dir.clone();
        self.compression = config.compression;
        self
    }

    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    pub fn root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn topic_map(mut self, topic_map: impl TopicMap + 'static) -> Self {
        self.topic_map = Box::new(topic_map);
        self
    }

    /// Use `backend` instead of inferring one from the root directory.
    pub fn backend(mut self, backend: Arc<dyn ArchiveBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Open the queue at `queue_time`. Touches no storage.
    pub fn build(self, queue_time: impl IntoTimestamp) -> Result<QueueWriter> {
        if self.queue_name.is_empty() || self.queue_name.contains(['.', '/']) {
            return Err(Error::InvalidFilename(format!(
                "invalid queue name {:?}: must be non-empty without '.' or '/'",
                self.queue_name
            )));
        }

        let backend = match self.backend {
            Some(backend) => backend,
            None => backend_for_path(&self.root_dir)?,
        };
        let root_dir = backend.normpath(&self.root_dir);
        let machine = self.machine.unwrap_or_else(default_machine);

        let mut writer = QueueWriter {
            queue_name: self.queue_name,
            machine,
            root_dir,
            compression: self.compression,
            topic_map: self.topic_map,
            backend,
            writers: HashMap::new(),
            state: None,
        };
        writer.reset_queue(queue_time)?;
        Ok(writer)
    }
}

/// Writes one queue of records into per-topic, per-day segment files
pub struct QueueWriter {
    queue_name: String,
    machine: String,
    root_dir: String,
    compression: Compression,
    topic_map: Box<dyn TopicMap>,
    backend: Arc<dyn ArchiveBackend>,
    writers: HashMap<u64, SegmentWriter>,
    state: Option<QueueState>,
}

impl QueueWriter {
    pub fn builder(queue_name: impl Into<String>) -> QueueWriterBuilder {
        QueueWriterBuilder::new(queue_name)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// Current queue time, `None` once closed
    pub fn queue_time(&self) -> Option<DateTime<Utc>> {
        self.state.map(|s| s.queue_time)
    }

    /// Timestamp at which the next write rotates, `None` once closed
    pub fn rotation_boundary(&self) -> Option<i64> {
        self.state.map(|s| s.rotate_at)
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_none()
    }

    /// Number of per-topic files currently open
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Close all per-topic writers and reopen the queue at `queue_time`.
    pub fn reset_queue(&mut self, queue_time: impl IntoTimestamp) -> Result<()> {
        self.close()?;
        let state = QueueState::new(queue_time.into_timestamp());
        debug!(
            queue = %self.queue_name,
            queue_time = %state.queue_time,
            "Queue reset"
        );
        self.state = Some(state);
        Ok(())
    }

    /// Append a record to its topic's file, rotating first when the record
    /// belongs to a later day.
    pub fn write(&mut self, record: &TopicRecord) -> Result<()> {
        let state = self
            .state
            .ok_or_else(|| Error::WriterClosed(self.queue_name.clone()))?;

        if record.timestamp >= state.rotate_at {
            let next = floor_to_day(record.timestamp);
            info!(
                queue = %self.queue_name,
                from = %state.queue_time,
                to = %next,
                "Rotating queue files"
            );
            self.reset_queue(next)?;
        }

        self.writer_for(record.topic_id)?.write_record(record)
    }

    /// Flush every open per-topic writer without rotating.
    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Close every per-topic writer. The first failure is returned after all
    /// writers have been closed.
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for (topic_id, mut writer) in self.writers.drain() {
            if let Err(e) = writer.close() {
                warn!(topic_id, path = %writer.path(), error = %e, "Failed to close topic writer");
                first_error.get_or_insert(e);
            }
        }
        self.state = None;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn writer_for(&mut self, topic_id: u64) -> Result<&mut SegmentWriter> {
        if !self.writers.contains_key(&topic_id) {
            let path = self.topic_path(topic_id)?;
            debug!(queue = %self.queue_name, topic_id, path = %path, "Opening topic writer");
            self.writers
                .insert(topic_id, SegmentWriter::new(Arc::clone(&self.backend), path));
        }
        self.writers
            .get_mut(&topic_id)
            .ok_or_else(|| Error::WriterClosed(self.queue_name.clone()))
    }

    fn topic_path(&self, topic_id: u64) -> Result<String> {
        let state = self
            .state
            .ok_or_else(|| Error::WriterClosed(self.queue_name.clone()))?;

        let dir = archive_dir(&self.root_dir, &self.machine, state.queue_time.date_naive());
        self.backend.ensure_dir(&dir)?;

        let filename = archive_filename(
            &self.topic_map.topic_string(topic_id),
            &self.queue_name,
            state.queue_time,
            self.compression,
        );
        Ok(join_path(&dir, &filename))
    }
}

impl Drop for QueueWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(queue = %self.queue_name, error = %e, "Failed to close queue writer");
        }
    }
}
