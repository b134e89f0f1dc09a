//! Sink-side reorder buffer.
//!
//! Parallel transform stages finish items out of sequence. The buffer holds
//! early arrivals keyed by sequence number and releases them strictly in
//! order. Sequence numbers announced as dropped are skipped so that a single
//! failed item does not pin every later item in memory until end of run.

use crate::pipeline::id::SeqNo;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    #[error("{seq} arrived after {next_expected} was already expected")]
    Stale { seq: SeqNo, next_expected: SeqNo },

    #[error("{0} arrived twice")]
    Duplicate(SeqNo),
}

/// What is left in the buffer when upstream is finished.
#[derive(Debug)]
pub struct Remaining<T> {
    /// Buffered items in ascending sequence order.
    pub items: Vec<(SeqNo, T)>,
    /// Sequence numbers below the highest buffered one that never arrived
    /// and were not announced as dropped.
    pub gaps: Vec<SeqNo>,
}

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_expected: SeqNo,
    pending: BTreeMap<SeqNo, T>,
    skipped: BTreeSet<SeqNo>,
    high_water: usize,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next_expected: SeqNo::ZERO,
            pending: BTreeMap::new(),
            skipped: BTreeSet::new(),
            high_water: 0,
        }
    }

    pub fn next_expected(&self) -> SeqNo {
        self.next_expected
    }

    /// Items currently held back.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Largest number of items ever held back at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Accept an item. Stale and duplicate sequence numbers are consistency
    /// violations: each number is assigned once and delivered at most once.
    pub fn insert(&mut self, seq: SeqNo, item: T) -> Result<(), ReorderError> {
        if seq < self.next_expected {
            return Err(ReorderError::Stale {
                seq,
                next_expected: self.next_expected,
            });
        }
        if self.pending.contains_key(&seq) || self.skipped.contains(&seq) {
            return Err(ReorderError::Duplicate(seq));
        }

        self.pending.insert(seq, item);
        self.high_water = self.high_water.max(self.pending.len());
        Ok(())
    }

    /// Mark `seq` as permanently absent. Numbers already passed are ignored.
    pub fn skip(&mut self, seq: SeqNo) {
        if seq >= self.next_expected && !self.pending.contains_key(&seq) {
            self.skipped.insert(seq);
        }
    }

    /// Release the next item in sequence, if it is here.
    pub fn pop_ready(&mut self) -> Option<(SeqNo, T)> {
        loop {
            let next = self.next_expected;
            if self.skipped.remove(&next) {
                self.next_expected = next.next();
                continue;
            }
            let item = self.pending.remove(&next)?;
            self.next_expected = next.next();
            return Some((next, item));
        }
    }

    /// Empty the buffer in ascending order, reporting unexplained holes.
    pub fn drain_remaining(&mut self) -> Remaining<T> {
        let mut gaps = Vec::new();
        let mut items = Vec::with_capacity(self.pending.len());
        let mut cursor = self.next_expected;

        for (seq, item) in std::mem::take(&mut self.pending) {
            while cursor < seq {
                if !self.skipped.contains(&cursor) {
                    gaps.push(cursor);
                }
                cursor = cursor.next();
            }
            items.push((seq, item));
            cursor = seq.next();
        }

        self.skipped.retain(|s| *s >= cursor);
        self.next_expected = cursor;
        Remaining { items, gaps }
    }
}
