//! Segment Writer
//!
//! `SegmentWriter` appends framed records to one segment file.
//!
//! ## Lazy Creation
//! Constructing a writer touches nothing. The backend handle is opened on the
//! first write, so a writer that never writes leaves no file behind. If the
//! file already exists and is non-empty, new frames are appended after the
//! existing ones without a second header.
//!
//! ## Topic Sequence
//! Records written without a `topic_seq` get one from a counter that starts
//! at 0 for each writer instance. The counter only advances when it assigns
//! a sequence to a frame that was written; explicit sequences leave it alone.
//!
//! ## Compression
//! Chosen by the path: a `.gz` segment is written through a gzip encoder.
//! `flush()` performs a sync flush so everything written so far can be
//! decompressed by a concurrent reader. `close()` finishes the gzip member;
//! a later reopen starts a new member.

use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use qflow_core::codec::encode_frame;
use qflow_core::segment::encode_header;
use qflow_core::{Compression, Payload, TopicRecord};
use tracing::{debug, warn};

use crate::backend::ArchiveBackend;
use crate::error::Result;

enum Sink {
    Plain(Box<dyn Write + Send>),
    Gzip(GzEncoder<Box<dyn Write + Send>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w,
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush()?,
            Sink::Gzip(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
            }
        }
        Ok(())
    }
}

/// Appends records to a single segment file
pub struct SegmentWriter {
    backend: Arc<dyn ArchiveBackend>,
    path: String,
    compression: Compression,
    sink: Option<Sink>,
    scratch: Vec<u8>,
    next_topic_seq: i64,
    records_written: u64,
}

impl SegmentWriter {
    /// Prepare a writer for `path`. No file is created until the first write.
    pub fn new(backend: Arc<dyn ArchiveBackend>, path: impl Into<String>) -> Self {
        let path = path.into();
        let compression = Compression::from_path(&path);
        Self {
            backend,
            path,
            compression,
            sink: None,
            scratch: Vec::new(),
            next_topic_seq: 0,
            records_written: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Records written by this writer instance
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Append one record built from its parts.
    pub fn write(
        &mut self,
        queue_seq: Option<i64>,
        topic_id: u64,
        topic_seq: Option<i64>,
        timestamp: i64,
        data: impl Into<Payload>,
    ) -> Result<()> {
        let record = TopicRecord::new(queue_seq, topic_id, topic_seq, timestamp, data);
        self.write_record(&record)
    }

    /// Append one record, assigning a topic sequence when it has none.
    pub fn write_record(&mut self, record: &TopicRecord) -> Result<()> {
        self.scratch.clear();
        let assigned = if record.topic_seq.is_some() {
            encode_frame(&mut self.scratch, record)?;
            false
        } else {
            let mut record = record.clone();
            record.topic_seq = Some(self.next_topic_seq);
            encode_frame(&mut self.scratch, &record)?;
            true
        };

        if self.sink.is_none() {
            self.sink = Some(self.open_sink()?);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.writer().write_all(&self.scratch)?;
        }
        if assigned {
            self.next_topic_seq += 1;
        }
        self.records_written += 1;
        Ok(())
    }

    /// Push buffered frames to the backend.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.writer().flush()?;
        }
        Ok(())
    }

    /// Flush and release the handle. Writing again reopens the file in append
    /// mode.
    pub fn close(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            sink.finish()?;
            debug!(
                path = %self.path,
                records = self.records_written,
                "Closed segment writer"
            );
        }
        Ok(())
    }

    fn open_sink(&self) -> Result<Sink> {
        let has_content =
            self.backend.exists(&self.path)? && self.backend.stat(&self.path)?.size > 0;
        let raw = self.backend.open_write(&self.path)?;

        let mut sink = match self.compression {
            Compression::None => Sink::Plain(raw),
            Compression::Gzip => Sink::Gzip(GzEncoder::new(raw, flate2::Compression::default())),
        };
        if !has_content {
            sink.writer().write_all(&encode_header())?;
        }

        debug!(
            path = %self.path,
            compression = ?self.compression,
            append = has_content,
            "Opened segment writer"
        );
        Ok(sink)
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path, error = %e, "Failed to close segment writer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{join_path, LocalBackend};
    use qflow_core::segment::HEADER_SIZE;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<dyn ArchiveBackend>) {
        (TempDir::new().unwrap(), Arc::new(LocalBackend::new()))
    }

    #[test]
    fn test_no_file_without_writes() {
        let (temp, backend) = setup();
        let path = join_path(temp.path().to_str().unwrap(), "lazy.q.20171221-000000Z");

        let mut writer = SegmentWriter::new(Arc::clone(&backend), &path);
        writer.flush().unwrap();
        writer.close().unwrap();
        drop(writer);

        assert!(!backend.exists(&path).unwrap());
    }

    #[test]
    fn test_header_written_once() {
        let (temp, backend) = setup();
        let path = join_path(temp.path().to_str().unwrap(), "h.q.20171221-000000Z");
        let record = TopicRecord::new(None, 1, Some(0), 5, b"abc");
        let frame_len = qflow_core::frame_bytes(&record).unwrap().len() as u64;

        let mut writer = SegmentWriter::new(Arc::clone(&backend), &path);
        writer.write_record(&record).unwrap();
        writer.close().unwrap();
        assert_eq!(backend.stat(&path).unwrap().size, HEADER_SIZE as u64 + frame_len);

        writer.write_record(&record).unwrap();
        writer.close().unwrap();
        assert_eq!(
            backend.stat(&path).unwrap().size,
            HEADER_SIZE as u64 + 2 * frame_len
        );
    }

    #[test]
    fn test_topic_seq_has_no_gaps() {
        use crate::reader::RecordReader;
        use crate::segment::SegmentReader;

        let (temp, backend) = setup();
        let dir = join_path(temp.path().to_str().unwrap(), "later");
        let path = join_path(&dir, "g.q.20171221-000000Z");

        // Directory missing: nothing is written and no sequence is used up
        let mut writer = SegmentWriter::new(Arc::clone(&backend), &path);
        assert!(writer.write(None, 1, None, 10, b"lost").is_err());
        assert_eq!(writer.records_written(), 0);

        backend.ensure_dir(&dir).unwrap();
        writer.write(None, 1, None, 11, b"a").unwrap();
        writer.write(None, 1, None, 12, b"b").unwrap();
        writer.close().unwrap();

        let reader = SegmentReader::open(backend.as_ref(), &path).unwrap();
        let seqs: Vec<Option<i64>> = reader.records().map(|r| r.unwrap().topic_seq).collect();
        assert_eq!(seqs, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_topic_seq_assigned_when_missing() {
        use crate::reader::RecordReader;
        use crate::segment::SegmentReader;

        let (temp, backend) = setup();
        let path = join_path(temp.path().to_str().unwrap(), "s.q.20171221-000000Z");

        let mut writer = SegmentWriter::new(Arc::clone(&backend), &path);
        writer.write(None, 1, None, 10, b"a").unwrap();
        writer.write(None, 1, Some(42), 11, b"b").unwrap();
        writer.write(None, 1, None, 12, b"c").unwrap();
        assert_eq!(writer.records_written(), 3);
        writer.close().unwrap();

        let reader = SegmentReader::open(backend.as_ref(), &path).unwrap();
        let seqs: Vec<Option<i64>> = reader.records().map(|r| r.unwrap().topic_seq).collect();
        assert_eq!(seqs, vec![Some(0), Some(42), Some(1)]);
    }

    #[test]
    fn test_drop_closes_gzip_member() {
        let (temp, backend) = setup();
        let path = join_path(temp.path().to_str().unwrap(), "d.q.20171221-000000Z.gz");

        {
            let mut writer = SegmentWriter::new(Arc::clone(&backend), &path);
            assert_eq!(writer.compression(), Compression::Gzip);
            writer.write(Some(1), 7, None, 99, "payload").unwrap();
            assert!(writer.is_open());
        }

        let raw = std::fs::read(&path).unwrap();
        // gzip magic
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
    }
}
