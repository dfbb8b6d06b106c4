//! Record Data Structure
//!
//! This module defines `TopicRecord`, the unit of storage in a qflow archive,
//! and `Fetch`, the outcome of polling any record source.
//!
//! ## Structure
//! Each record contains:
//! - **queue_seq**: Optional position within the writer's logical queue
//! - **topic_id**: Identifies the logical stream
//! - **topic_seq**: Optional position within just this topic
//! - **timestamp**: Nanoseconds since the Unix epoch, the sort key for every
//!   merge and query operation
//! - **data**: Opaque payload bytes
//!
//! ## Payloads
//! Producers hand in a `Payload`. Raw bytes pass through untouched; JSON
//! values are rendered to JSON text before framing. Readers always get bytes
//! back and can decode them with [`TopicRecord::data_json`].
//!
//! ## Example
//! ```ignore
//! let record = TopicRecord::new(Some(7), 3, None, 1_513_848_255_372_063_000, "tick");
//! let structured = TopicRecord::json(None, 3, None, ts, &order)?;
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A single record in a topic stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    /// Position in the writer's queue, independent of the file
    pub queue_seq: Option<i64>,

    /// Logical stream id
    pub topic_id: u64,

    /// Position within this topic
    pub topic_seq: Option<i64>,

    /// Nanoseconds since epoch
    pub timestamp: i64,

    /// Payload
    pub data: Bytes,
}

impl TopicRecord {
    pub fn new(
        queue_seq: Option<i64>,
        topic_id: u64,
        topic_seq: Option<i64>,
        timestamp: i64,
        data: impl Into<Payload>,
    ) -> Self {
        Self {
            queue_seq,
            topic_id,
            topic_seq,
            timestamp,
            data: data.into().into_bytes(),
        }
    }

    /// Build a record whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(
        queue_seq: Option<i64>,
        topic_id: u64,
        topic_seq: Option<i64>,
        timestamp: i64,
        value: &T,
    ) -> Result<Self> {
        let data = serde_json::to_vec(value)?;
        Ok(Self::new(queue_seq, topic_id, topic_seq, timestamp, data))
    }

    /// Decode the payload as JSON.
    pub fn data_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Size of this record once framed, excluding the frame prefix
    pub fn encoded_body_len(&self) -> usize {
        1 + // flags
        self.queue_seq.map(|_| 8).unwrap_or(0) +
        8 + // topic_id
        self.topic_seq.map(|_| 8).unwrap_or(0) +
        8 + // timestamp
        4 + // data length
        self.data.len()
    }
}

/// Payload handed in by a producer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bytes stored verbatim
    Raw(Bytes),

    /// Structured value stored as JSON text
    Json(serde_json::Value),
}

impl Payload {
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Raw(bytes) => bytes,
            // Display for Value is infallible compact JSON
            Payload::Json(value) => Bytes::from(value.to_string()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Raw(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Raw(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(value: &[u8; N]) -> Self {
        Payload::Raw(Bytes::copy_from_slice(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Raw(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Raw(Bytes::from(value))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Outcome of polling a record source.
///
/// `Pending` and `Eof` are both "nothing to hand out right now". They differ in
/// whether a partial frame (or header) is sitting in the buffer: a tailing
/// reader will usually see `Pending` while a writer is mid-append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    /// A complete, checksummed record
    Record(TopicRecord),

    /// Some bytes of the next frame are buffered but not all of them
    Pending,

    /// Nothing buffered beyond the last complete frame
    Eof,
}

impl Fetch {
    pub fn is_record(&self) -> bool {
        matches!(self, Fetch::Record(_))
    }

    pub fn record(&self) -> Option<&TopicRecord> {
        match self {
            Fetch::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<TopicRecord> {
        match self {
            Fetch::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.record().map(|r| r.timestamp)
    }
}
