//! Record Frame Codec
//!
//! Every record in a segment is stored as one self-delimiting frame:
//!
//! ```text
//! ┌─────────────┬──────────┬──────────────────────────────────────────┐
//! │ Frame Len   │ CRC32    │ Body (Frame Len bytes)                   │
//! │ (4 bytes)   │(4 bytes) │                                          │
//! └─────────────┴──────────┴──────────────────────────────────────────┘
//!
//! Body:
//! ┌───────┬────────────┬──────────┬────────────┬───────────┬──────────┬──────┐
//! │ Flags │ Queue Seq  │ Topic ID │ Topic Seq  │ Timestamp │ Data Len │ Data │
//! │ (1)   │ (8, opt)   │ (8)      │ (8, opt)   │ (8)       │ (4)      │ (N)  │
//! └───────┴────────────┴──────────┴────────────┴───────────┴──────────┴──────┘
//! ```
//!
//! All integers are little-endian. Flag bit 0 marks a present queue sequence,
//! bit 1 a present topic sequence. The CRC32 covers the body only.
//!
//! ## Partial Frames
//! `decode_frame` never fails because bytes are missing: it reports
//! `Decoded::Incomplete` until the whole frame is buffered. Only a complete
//! frame is checksummed. A checksum mismatch is reported together with the
//! frame size so the caller can step over it.

use bytes::{Buf, BufMut, Bytes};

use crate::{Error, Result, TopicRecord};

/// Size of the length + checksum prefix of every frame
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Largest body a frame may declare (256MB)
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

const FLAG_QUEUE_SEQ: u8 = 0b01;
const FLAG_TOPIC_SEQ: u8 = 0b10;

/// Result of decoding from the front of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes buffered for a complete frame
    Incomplete,

    /// A valid record spanning `len` bytes of the buffer
    Frame { record: TopicRecord, len: usize },

    /// A complete frame spanning `len` bytes whose checksum does not match
    Corrupted { len: usize, stored: u32, computed: u32 },
}

/// Append one framed record to `buf`.
pub fn encode_frame<B: BufMut>(buf: &mut B, record: &TopicRecord) -> Result<()> {
    let body_len = record.encoded_body_len();
    if body_len > MAX_FRAME_SIZE {
        return Err(Error::InvalidFrame(format!(
            "record body of {} bytes exceeds {} byte limit",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let mut body = Vec::with_capacity(body_len);
    let mut flags = 0u8;
    if record.queue_seq.is_some() {
        flags |= FLAG_QUEUE_SEQ;
    }
    if record.topic_seq.is_some() {
        flags |= FLAG_TOPIC_SEQ;
    }
    body.put_u8(flags);
    if let Some(queue_seq) = record.queue_seq {
        body.put_i64_le(queue_seq);
    }
    body.put_u64_le(record.topic_id);
    if let Some(topic_seq) = record.topic_seq {
        body.put_i64_le(topic_seq);
    }
    body.put_i64_le(record.timestamp);
    body.put_u32_le(record.data.len() as u32);
    body.put_slice(&record.data);

    buf.put_u32_le(body.len() as u32);
    buf.put_u32_le(crc32fast::hash(&body));
    buf.put_slice(&body);
    Ok(())
}

/// Encode one record into a fresh buffer.
pub fn frame_bytes(record: &TopicRecord) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(FRAME_PREFIX_SIZE + record.encoded_body_len());
    encode_frame(&mut buf, record)?;
    Ok(buf)
}

/// Decode the frame at the front of `buf`.
///
/// Errors only when the frame structure itself is unusable (declared lengths
/// out of range or inconsistent); such a stream cannot be resynchronized.
pub fn decode_frame(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < FRAME_PREFIX_SIZE {
        return Ok(Decoded::Incomplete);
    }

    let mut prefix = &buf[..FRAME_PREFIX_SIZE];
    let body_len = prefix.get_u32_le() as usize;
    let stored = prefix.get_u32_le();

    if body_len > MAX_FRAME_SIZE {
        return Err(Error::InvalidFrame(format!(
            "declared frame length {} exceeds {} byte limit",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let len = FRAME_PREFIX_SIZE + body_len;
    if buf.len() < len {
        return Ok(Decoded::Incomplete);
    }

    let body = &buf[FRAME_PREFIX_SIZE..len];
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Ok(Decoded::Corrupted {
            len,
            stored,
            computed,
        });
    }

    let record = decode_body(body)?;
    Ok(Decoded::Frame { record, len })
}

fn decode_body(mut body: &[u8]) -> Result<TopicRecord> {
    let flags = take_u8(&mut body)?;
    let queue_seq = if flags & FLAG_QUEUE_SEQ != 0 {
        Some(take_i64(&mut body)?)
    } else {
        None
    };
    let topic_id = take_i64(&mut body)? as u64;
    let topic_seq = if flags & FLAG_TOPIC_SEQ != 0 {
        Some(take_i64(&mut body)?)
    } else {
        None
    };
    let timestamp = take_i64(&mut body)?;

    if body.remaining() < 4 {
        return Err(truncated_body());
    }
    let data_len = body.get_u32_le() as usize;
    if body.remaining() != data_len {
        return Err(Error::InvalidFrame(format!(
            "payload length {} does not match remaining {} bytes",
            data_len,
            body.remaining()
        )));
    }

    Ok(TopicRecord {
        queue_seq,
        topic_id,
        topic_seq,
        timestamp,
        data: Bytes::copy_from_slice(body),
    })
}

fn take_u8(body: &mut &[u8]) -> Result<u8> {
    if body.remaining() < 1 {
        return Err(truncated_body());
    }
    Ok(body.get_u8())
}

fn take_i64(body: &mut &[u8]) -> Result<i64> {
    if body.remaining() < 8 {
        return Err(truncated_body());
    }
    Ok(body.get_i64_le())
}

fn truncated_body() -> Error {
    Error::InvalidFrame("frame body shorter than its fields".to_string())
}
