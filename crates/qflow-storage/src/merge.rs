//! Timestamp Merge Reader
//!
//! K-way merge over any number of record readers. Each reader contributes its
//! next record; the merge always hands out the globally smallest timestamp.
//!
//! ## How It Works
//!
//! ```text
//!   reader A: 10 ── 40 ── 70
//!   reader B: 20 ── 30 ── 90           heap of (timestamp, slot)
//!   reader C: 10 ── 50                 ┌──────────────────────┐
//!                                      │ (10,A) (10,C) (20,B) │
//!                                      └──────────────────────┘
//!   read() → A:10, C:10, B:20, B:30, A:40, C:50, A:70, B:90
//! ```
//!
//! - Ties go to the reader that was added first.
//! - A reader is refilled lazily: after its record is handed out, its next
//!   record is read at the start of the following call.
//! - A reader that reports `Pending` or `Eof` is exhausted: it is closed,
//!   the optional exhausted hook sees it, and it is dropped. A tailing caller
//!   re-adds readers itself.
//! - A refill that fails is reported to the caller and retried on the next
//!   call.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use qflow_core::{Fetch, TopicRecord};
use tracing::debug;

use crate::error::Result;
use crate::reader::RecordReader;

/// Called with each reader right after it is closed for exhaustion
pub type ExhaustedHook<R> = Box<dyn FnMut(&R) + Send>;

struct Slot<R> {
    reader: R,
    head: Option<TopicRecord>,
}

/// Merges readers by record timestamp
pub struct TimestampMergeReader<R: RecordReader> {
    slots: HashMap<u64, Slot<R>>,
    heap: BinaryHeap<Reverse<(i64, u64)>>,
    refill: VecDeque<u64>,
    next_slot: u64,
    on_exhausted: Option<ExhaustedHook<R>>,
}

impl<R: RecordReader> Default for TimestampMergeReader<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RecordReader> TimestampMergeReader<R> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            heap: BinaryHeap::new(),
            refill: VecDeque::new(),
            next_slot: 0,
            on_exhausted: None,
        }
    }

    pub fn with_exhausted_hook(mut self, hook: impl FnMut(&R) + Send + 'static) -> Self {
        self.on_exhausted = Some(Box::new(hook));
        self
    }

    /// Add a reader. Its first record is read on the next call.
    pub fn add_reader(&mut self, reader: R) {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(slot, Slot { reader, head: None });
        self.refill.push_back(slot);
    }

    /// Number of readers still merged
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn refill_all(&mut self) -> Result<()> {
        while let Some(&slot_id) = self.refill.front() {
            let Some(slot) = self.slots.get_mut(&slot_id) else {
                self.refill.pop_front();
                continue;
            };

            match slot.reader.read()? {
                Fetch::Record(record) => {
                    self.heap.push(Reverse((record.timestamp, slot_id)));
                    slot.head = Some(record);
                }
                Fetch::Pending | Fetch::Eof => self.retire(slot_id),
            }
            self.refill.pop_front();
        }
        Ok(())
    }

    fn retire(&mut self, slot_id: u64) {
        if let Some(mut slot) = self.slots.remove(&slot_id) {
            slot.reader.close();
            if let Some(hook) = self.on_exhausted.as_mut() {
                hook(&slot.reader);
            }
            debug!(slot = slot_id, remaining = self.slots.len(), "Merge input exhausted");
        }
    }
}

impl<R: RecordReader> RecordReader for TimestampMergeReader<R> {
    fn peek(&mut self) -> Result<Fetch> {
        self.refill_all()?;
        let head = self
            .heap
            .peek()
            .and_then(|Reverse((_, slot_id))| self.slots.get(slot_id))
            .and_then(|slot| slot.head.clone());
        Ok(head.map(Fetch::Record).unwrap_or(Fetch::Eof))
    }

    fn read(&mut self) -> Result<Fetch> {
        self.refill_all()?;
        let Some(Reverse((_, slot_id))) = self.heap.pop() else {
            return Ok(Fetch::Eof);
        };
        let head = self.slots.get_mut(&slot_id).and_then(|slot| slot.head.take());
        self.refill.push_back(slot_id);
        Ok(head.map(Fetch::Record).unwrap_or(Fetch::Eof))
    }

    fn close(&mut self) {
        for (_, mut slot) in self.slots.drain() {
            slot.reader.close();
        }
        self.heap.clear();
        self.refill.clear();
    }
}
