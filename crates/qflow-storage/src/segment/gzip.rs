//! Incremental gzip decoding for segments that are still being written.
//!
//! `flate2`'s stream decoders treat a short read as the end of input. A
//! segment writer only sync-flushes, so a live `.gz` segment usually ends in
//! the middle of a member. `GzipSource` keeps the raw bytes it has not
//! decoded yet and drives a raw-deflate [`Decompress`] itself, parsing member
//! headers and trailers by hand. When the raw source has nothing new it
//! returns `Ok(0)` and keeps its state, so polling again after the file grows
//! continues where it stopped.

use std::io::{self, ErrorKind, Read};

use bytes::{Buf, BytesMut};
use flate2::{Crc, Decompress, FlushDecompress, Status};

const RAW_CHUNK: usize = 64 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;
const FIXED_HEADER: usize = 10;
const TRAILER: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Body,
    Trailer,
}

/// Multi-member gzip decoder over a source that may grow
pub struct GzipSource {
    raw: Box<dyn Read + Send>,
    input: BytesMut,
    stage: Stage,
    inflate: Decompress,
    crc: Crc,
}

impl GzipSource {
    pub fn new(raw: Box<dyn Read + Send>) -> Self {
        Self {
            raw,
            input: BytesMut::new(),
            stage: Stage::Header,
            inflate: Decompress::new(false),
            crc: Crc::new(),
        }
    }

    /// Append whatever the raw source has right now. Returns the byte count.
    fn pull(&mut self) -> io::Result<usize> {
        let start = self.input.len();
        self.input.resize(start + RAW_CHUNK, 0);
        loop {
            match self.raw.read(&mut self.input[start..]) {
                Ok(n) => {
                    self.input.truncate(start + n);
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.input.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    fn finish_member(&mut self) -> io::Result<()> {
        let stored_crc = self.input.get_u32_le();
        let stored_size = self.input.get_u32_le();
        if stored_crc != self.crc.sum() || stored_size != self.crc.amount() {
            return Err(invalid("gzip member checksum mismatch"));
        }
        self.inflate.reset(false);
        self.crc.reset();
        self.stage = Stage::Header;
        Ok(())
    }
}

impl Read for GzipSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.stage {
                Stage::Header => {
                    if let Some(len) = header_len(&self.input)? {
                        self.input.advance(len);
                        self.stage = Stage::Body;
                        continue;
                    }
                }
                Stage::Trailer => {
                    if self.input.len() >= TRAILER {
                        self.finish_member()?;
                        continue;
                    }
                }
                // Also runs on empty input to drain output the inflater still holds
                Stage::Body => {
                    let before_in = self.inflate.total_in();
                    let before_out = self.inflate.total_out();
                    let status = self
                        .inflate
                        .decompress(&self.input, buf, FlushDecompress::None)
                        .map_err(|e| invalid(&e.to_string()))?;
                    let consumed = (self.inflate.total_in() - before_in) as usize;
                    let produced = (self.inflate.total_out() - before_out) as usize;
                    self.input.advance(consumed);
                    self.crc.update(&buf[..produced]);

                    if status == Status::StreamEnd {
                        self.stage = Stage::Trailer;
                    }
                    if produced > 0 {
                        return Ok(produced);
                    }
                    if consumed > 0 || status == Status::StreamEnd {
                        continue;
                    }
                }
            }

            // Everything buffered is used up for now
            if self.pull()? == 0 {
                return Ok(0);
            }
        }
    }
}

/// Length of the gzip member header at the start of `input`, `None` while it
/// is incomplete.
fn header_len(input: &[u8]) -> io::Result<Option<usize>> {
    if input.len() < FIXED_HEADER {
        if !input.is_empty() && input[0] != GZIP_MAGIC[0] {
            return Err(invalid("not a gzip stream"));
        }
        return Ok(None);
    }
    if input[..2] != GZIP_MAGIC || input[2] != METHOD_DEFLATE {
        return Err(invalid("not a gzip stream"));
    }

    let flags = input[3];
    let mut pos = FIXED_HEADER;
    if flags & FEXTRA != 0 {
        let Some(len) = input.get(pos..pos + 2) else {
            return Ok(None);
        };
        pos += 2 + u16::from_le_bytes([len[0], len[1]]) as usize;
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            let Some(rest) = input.get(pos..) else {
                return Ok(None);
            };
            match rest.iter().position(|b| *b == 0) {
                Some(end) => pos += end + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    Ok((input.len() >= pos).then_some(pos))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

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

    fn gzip(parts: &[&[u8]]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        for part in parts {
            encoder.write_all(part).unwrap();
            encoder.flush().unwrap();
        }
        encoder.finish().unwrap()
    }

    fn drain(source: &mut GzipSource, out: &mut Vec<u8>) {
        let mut buf = [0u8; 7];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                return;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_decodes_multiple_members() {
        let mut stream = gzip(&[b"hello "]);
        stream.extend(gzip(&[b"gzip ", b"world"]));

        let mut source = GzipSource::new(Box::new(Cursor::new(stream)));
        let mut out = Vec::new();
        drain(&mut source, &mut out);
        assert_eq!(out, b"hello gzip world");
    }

    #[test]
    fn test_byte_by_byte_growth() {
        let stream = gzip(&[b"first;", b"second;", b"third"]);
        let growing = Growing::default();
        let mut source = GzipSource::new(Box::new(growing.clone()));

        let mut out = Vec::new();
        for byte in &stream {
            growing.push(&[*byte]);
            drain(&mut source, &mut out);
        }
        assert_eq!(out, b"first;second;third");
    }

    #[test]
    fn test_sync_flushed_prefix_is_readable() {
        let growing = Growing::default();
        let mut source = GzipSource::new(Box::new(growing.clone()));
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());

        encoder.write_all(b"one").unwrap();
        encoder.flush().unwrap();
        growing.push(&std::mem::take(encoder.get_mut()));
        let mut out = Vec::new();
        drain(&mut source, &mut out);
        assert_eq!(out, b"one");

        encoder.write_all(b"two").unwrap();
        encoder.flush().unwrap();
        growing.push(&std::mem::take(encoder.get_mut()));
        drain(&mut source, &mut out);
        assert_eq!(out, b"onetwo");
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        let mut source = GzipSource::new(Box::new(Cursor::new(b"Hello, world".to_vec())));
        let err = source.read(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_rejects_bad_trailer() {
        let mut stream = gzip(&[b"payload"]);
        let len = stream.len();
        stream[len - 8] ^= 0xff;

        let mut source = GzipSource::new(Box::new(Cursor::new(stream)));
        let mut buf = [0u8; 64];
        let mut result = source.read(&mut buf);
        while let Ok(n) = result {
            assert!(n > 0, "trailer corruption went unnoticed");
            result = source.read(&mut buf);
        }
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidData);
    }
}
