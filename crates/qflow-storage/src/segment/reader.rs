//! Segment Reader
//!
//! `SegmentReader` polls one segment file for records. It is built for
//! tailing: it never fails because bytes are missing, it just reports that
//! nothing complete is available yet.
//!
//! ## Poll Results
//!
//! | buffered bytes                         | `peek()` / `read()`          |
//! |----------------------------------------|------------------------------|
//! | none                                   | `Ok(Fetch::Eof)`             |
//! | part of the header or of a frame       | `Ok(Fetch::Pending)`         |
//! | a complete frame                       | `Ok(Fetch::Record(..))`      |
//! | a complete frame with a bad checksum   | `Err(CrcMismatch)`, consumed |
//! | a header with the wrong magic          | `Err(InvalidMagic)`          |
//!
//! Reads pull fixed-size chunks from the source only when the buffered bytes
//! do not contain a complete frame, so memory stays bounded by the largest
//! frame.

use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use qflow_core::codec::{decode_frame, Decoded};
use qflow_core::segment::{check_header, HEADER_SIZE};
use qflow_core::{Compression, Fetch, TopicRecord};
use tracing::{debug, warn};

use crate::backend::ArchiveBackend;
use crate::error::{Error, Result};
use crate::reader::RecordReader;
use crate::segment::gzip::GzipSource;

const READ_CHUNK: usize = 64 * 1024;

/// Polling reader over one segment file
pub struct SegmentReader {
    path: String,
    source: Option<Box<dyn Read + Send>>,
    buffer: BytesMut,
    header_checked: bool,
    peeked: Option<TopicRecord>,
}

impl SegmentReader {
    /// Open `path`, decompressing when it carries a `.gz` extension.
    pub fn open(backend: &dyn ArchiveBackend, path: &str) -> Result<Self> {
        let raw = backend.open_read(path)?;
        let source: Box<dyn Read + Send> = match Compression::from_path(path) {
            Compression::None => raw,
            Compression::Gzip => Box::new(GzipSource::new(raw)),
        };
        debug!(path = %path, "Opened segment reader");
        Ok(Self::from_source(path, source))
    }

    /// Read an already decompressed segment byte stream.
    pub fn from_source(path: impl Into<String>, source: Box<dyn Read + Send>) -> Self {
        Self {
            path: path.into(),
            source: Some(source),
            buffer: BytesMut::new(),
            header_checked: false,
            peeked: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    fn fetch_next(&mut self) -> Result<Fetch> {
        loop {
            if !self.header_checked {
                if self.buffer.len() >= HEADER_SIZE {
                    check_header(&self.buffer[..HEADER_SIZE])?;
                    self.buffer.advance(HEADER_SIZE);
                    self.header_checked = true;
                    continue;
                }
            } else {
                match decode_frame(&self.buffer)? {
                    Decoded::Frame { record, len } => {
                        self.buffer.advance(len);
                        return Ok(Fetch::Record(record));
                    }
                    Decoded::Corrupted {
                        len,
                        stored,
                        computed,
                    } => {
                        self.buffer.advance(len);
                        warn!(
                            path = %self.path,
                            frame_len = len,
                            "Skipped frame with checksum mismatch"
                        );
                        return Err(qflow_core::Error::CrcMismatch { stored, computed }.into());
                    }
                    Decoded::Incomplete => {}
                }
            }

            if self.fill()? == 0 {
                return Ok(if self.buffer.is_empty() {
                    Fetch::Eof
                } else {
                    Fetch::Pending
                });
            }
        }
    }

    /// Pull one chunk from the source. Returns 0 when nothing more is
    /// available right now.
    fn fill(&mut self) -> Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };

        let start = self.buffer.len();
        self.buffer.resize(start + READ_CHUNK, 0);
        loop {
            match source.read(&mut self.buffer[start..]) {
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.buffer.truncate(start);
                    return Ok(0);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidInput | ErrorKind::InvalidData) => {
                    self.buffer.truncate(start);
                    return Err(Error::Codec(qflow_core::Error::InvalidFrame(format!(
                        "undecodable stream in {}: {}",
                        self.path, e
                    ))));
                }
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            }
        }
    }
}

impl RecordReader for SegmentReader {
    fn peek(&mut self) -> Result<Fetch> {
        if let Some(record) = &self.peeked {
            return Ok(Fetch::Record(record.clone()));
        }
        let fetch = self.fetch_next()?;
        if let Fetch::Record(record) = &fetch {
            self.peeked = Some(record.clone());
        }
        Ok(fetch)
    }

    fn read(&mut self) -> Result<Fetch> {
        match self.peeked.take() {
            Some(record) => Ok(Fetch::Record(record)),
            None => self.fetch_next(),
        }
    }

    fn close(&mut self) {
        if self.source.take().is_some() {
            debug!(path = %self.path, "Closed segment reader");
        }
        self.buffer.clear();
        self.peeked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::codec::frame_bytes;
    use qflow_core::segment::encode_header;
    use std::io::{self, Cursor};
    use std::sync::{Arc, Mutex};

    /// A byte source that a test can grow between polls
    #[derive(Clone, Default)]
    struct Growing {
        data: Arc<Mutex<Vec<u8>>>,
        pos: usize,
    }

    impl Growing {
        fn push(&self, bytes: &[u8]) {
            self.data.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl Read for Growing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.data.lock().unwrap();
            let n = buf.len().min(data.len() - self.pos);
            buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn record(i: i64) -> TopicRecord {
        TopicRecord::new(Some(i), 3, Some(i), 1_000 + i, format!("record-{}", i))
    }

    #[test]
    fn test_partial_writes_byte_by_byte() {
        let mut stream = encode_header().to_vec();
        let records: Vec<TopicRecord> = (0..5).map(record).collect();
        for r in &records {
            stream.extend_from_slice(&frame_bytes(r).unwrap());
        }

        let source = Growing::default();
        let mut reader = SegmentReader::from_source("growing", Box::new(source.clone()));
        assert_eq!(reader.read().unwrap(), Fetch::Eof);

        let mut got = Vec::new();
        for byte in &stream {
            source.push(&[*byte]);
            match reader.read().unwrap() {
                Fetch::Record(r) => got.push(r),
                Fetch::Pending => {}
                Fetch::Eof => {}
            }
        }
        assert_eq!(got, records);
        assert_eq!(reader.read().unwrap(), Fetch::Eof);
    }

    #[test]
    fn test_gzip_partial_writes_byte_by_byte() {
        use crate::backend::{join_path, LocalBackend};
        use crate::segment::SegmentWriter;
        use std::io::Write;

        let temp = tempfile::TempDir::new().unwrap();
        let backend: Arc<dyn ArchiveBackend> = Arc::new(LocalBackend::new());
        let dir = temp.path().to_str().unwrap();
        let source_path = join_path(dir, "src.q.20171221-000000Z.gz");
        let copy_path = join_path(dir, "copy.q.20171221-000000Z.gz");

        let records: Vec<TopicRecord> = (0..3).map(record).collect();
        let mut writer = SegmentWriter::new(Arc::clone(&backend), &source_path);
        for r in &records {
            writer.write_record(r).unwrap();
        }
        writer.close().unwrap();
        let stream = std::fs::read(&source_path).unwrap();

        let mut copy = std::fs::File::create(&copy_path).unwrap();
        let mut reader = SegmentReader::open(backend.as_ref(), &copy_path).unwrap();
        let mut got = Vec::new();
        for byte in &stream {
            copy.write_all(&[*byte]).unwrap();
            copy.flush().unwrap();
            while let Fetch::Record(r) = reader.read().unwrap() {
                got.push(r);
            }
        }
        assert_eq!(got, records);
        assert_eq!(reader.read().unwrap(), Fetch::Eof);
    }

    #[test]
    fn test_pending_vs_eof() {
        let source = Growing::default();
        let mut reader = SegmentReader::from_source("p", Box::new(source.clone()));

        source.push(&encode_header()[..3]);
        assert_eq!(reader.peek().unwrap(), Fetch::Pending);

        source.push(&encode_header()[3..]);
        assert_eq!(reader.peek().unwrap(), Fetch::Eof);

        let frame = frame_bytes(&record(1)).unwrap();
        source.push(&frame[..frame.len() - 1]);
        assert_eq!(reader.peek().unwrap(), Fetch::Pending);

        source.push(&frame[frame.len() - 1..]);
        assert_eq!(reader.peek().unwrap(), Fetch::Record(record(1)));
    }

    #[test]
    fn test_bad_magic() {
        let source = Growing::default();
        let mut reader = SegmentReader::from_source("hello", Box::new(source.clone()));

        source.push(b"Hello");
        assert_eq!(reader.read().unwrap(), Fetch::Pending);

        source.push(b", world");
        let err = reader.read().unwrap_err();
        assert!(matches!(err, Error::Codec(qflow_core::Error::InvalidMagic)));
        assert!(err.is_unreadable_segment());
    }

    #[test]
    fn test_crc_mismatch_is_skipped() {
        let mut stream = encode_header().to_vec();
        stream.extend_from_slice(&frame_bytes(&record(1)).unwrap());
        let mut bad = frame_bytes(&record(2)).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        stream.extend_from_slice(&bad);
        stream.extend_from_slice(&frame_bytes(&record(3)).unwrap());

        let mut reader = SegmentReader::from_source("crc", Box::new(Cursor::new(stream)));
        assert_eq!(reader.read().unwrap(), Fetch::Record(record(1)));
        assert!(reader.read().unwrap_err().is_crc_mismatch());
        assert_eq!(reader.read().unwrap(), Fetch::Record(record(3)));
        assert_eq!(reader.read().unwrap(), Fetch::Eof);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut stream = encode_header().to_vec();
        stream.extend_from_slice(&frame_bytes(&record(1)).unwrap());
        stream.extend_from_slice(&frame_bytes(&record(2)).unwrap());

        let mut reader = SegmentReader::from_source("peek", Box::new(Cursor::new(stream)));
        assert_eq!(reader.peek().unwrap().timestamp(), Some(1_001));
        assert_eq!(reader.peek().unwrap().timestamp(), Some(1_001));
        assert_eq!(reader.read().unwrap().timestamp(), Some(1_001));
        assert_eq!(reader.read().unwrap().timestamp(), Some(1_002));
    }

    #[test]
    fn test_closed_reader_is_eof() {
        let mut stream = encode_header().to_vec();
        stream.extend_from_slice(&frame_bytes(&record(1)).unwrap());

        let mut reader = SegmentReader::from_source("closed", Box::new(Cursor::new(stream)));
        reader.close();
        assert!(reader.is_closed());
        assert_eq!(reader.read().unwrap(), Fetch::Eof);
    }
}
