//! Polling Record Sources
//!
//! Every reader in this crate (one segment, a merge of segments, a whole
//! archive) exposes the same three operations:
//!
//! - `peek()` returns the next record without consuming it
//! - `read()` returns the next record and consumes it
//! - `close()` releases whatever handles the reader owns
//!
//! Both `peek` and `read` answer with a [`Fetch`]. `Fetch::Pending` and
//! `Fetch::Eof` mean "nothing right now" and are not terminal: polling again
//! after a writer appends more bytes picks up the new records.

use qflow_core::{Fetch, TopicRecord};

use crate::error::Result;

/// A source of records that can be polled
pub trait RecordReader {
    fn peek(&mut self) -> Result<Fetch>;

    fn read(&mut self) -> Result<Fetch>;

    fn close(&mut self);

    /// Consume the reader as an iterator that stops at the first
    /// `Pending`/`Eof`.
    fn records(self) -> Records<Self>
    where
        Self: Sized,
    {
        Records::new(self)
    }
}

impl<R: RecordReader + ?Sized> RecordReader for Box<R> {
    fn peek(&mut self) -> Result<Fetch> {
        (**self).peek()
    }

    fn read(&mut self) -> Result<Fetch> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Single-pass iterator over the records currently available from a reader.
///
/// Checksum failures are yielded as errors and iteration continues with the
/// next frame. Any other error is yielded once and ends the iteration.
pub struct Records<R: RecordReader> {
    reader: R,
    done: bool,
}

impl<R: RecordReader> Records<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: RecordReader> Iterator for Records<R> {
    type Item = Result<TopicRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read() {
            Ok(Fetch::Record(record)) => Some(Ok(record)),
            Ok(Fetch::Pending) | Ok(Fetch::Eof) => {
                self.done = true;
                None
            }
            Err(e) => {
                if !e.is_crc_mismatch() {
                    self.done = true;
                }
                Some(Err(e))
            }
        }
    }
}
