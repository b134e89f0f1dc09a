//! Bounded blocking queue connecting two pipeline stages.
//!
//! A `Mutex<VecDeque>` guarded by two condition variables: producers wait on
//! `not_full`, consumers on `not_empty`. Sentinels share the capacity with
//! data, so `len() <= capacity()` holds for everything the queue stores.
//!
//! Shutdown uses poison pills: the last producer calls [`BoundedQueue::close`]
//! with the number of consumers, and every consumer receives exactly one
//! [`Popped::Sentinel`]. [`BoundedQueue::abort`] is the emergency path that
//! releases every blocked thread at once.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of a [`BoundedQueue::pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    /// This consumer's shutdown marker. Exit after forwarding shutdown.
    Sentinel,
    /// The run was aborted. Exit without waiting for upstream.
    Aborted,
}

enum Slot<T> {
    Item(T),
    Sentinel,
}

/// Counters describing the queue's life so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    /// Data items pushed (sentinels excluded).
    pub total_pushed: u64,
    /// Data items popped (sentinels excluded).
    pub total_popped: u64,
    pub sentinels_pushed: u64,
    pub sentinels_popped: u64,
    /// Largest length ever observed, sentinels included.
    pub high_water: usize,
    /// Pushes that found the queue full and had to wait.
    pub blocked_pushes: u64,
    /// Total time producers spent waiting for space, in microseconds.
    pub push_wait_us: u64,
}

struct QueueState<T> {
    slots: VecDeque<Slot<T>>,
    closed: bool,
    /// Sentinels promised by `close` but not yet enqueued.
    sentinels_owed: usize,
    aborted: bool,
    stats: QueueStats,
}

/// Thread-safe fixed-capacity FIFO with poison-pill shutdown.
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// The backing storage is reserved up front so that a running pipeline
    /// never grows a queue.
    pub fn new(name: impl Into<String>, capacity: usize) -> PipelineResult<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "queue '{}' needs a capacity of at least 1",
                name
            )));
        }

        let mut slots = VecDeque::new();
        slots.try_reserve_exact(capacity).map_err(|e| {
            PipelineError::Allocation(format!(
                "queue '{}' with capacity {}: {}",
                name, capacity, e
            ))
        })?;

        Ok(Self {
            name,
            capacity,
            state: Mutex::new(QueueState {
                slots,
                closed: false,
                sentinels_owed: 0,
                aborted: false,
                stats: QueueStats {
                    capacity,
                    ..QueueStats::default()
                },
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of stored entries, sentinels included.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Fails with `Aborted` once [`abort`](Self::abort) has been called and
    /// with `QueueClosedMisuse` when a producer pushes after `close`.
    pub fn push(&self, item: T) -> PipelineResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(self.misuse("push after close"));
        }
        state = self.wait_for_space(state)?;
        if state.closed {
            return Err(self.misuse("push after close"));
        }

        state.slots.push_back(Slot::Item(item));
        state.stats.total_pushed += 1;
        Self::note_len(&mut state);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head entry, blocking while the queue is empty and a
    /// sentinel may still arrive.
    pub fn pop(&self) -> PipelineResult<Popped<T>> {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Ok(Popped::Aborted);
            }

            if let Some(slot) = state.slots.pop_front() {
                let popped = match slot {
                    Slot::Item(item) => {
                        state.stats.total_popped += 1;
                        Popped::Item(item)
                    }
                    Slot::Sentinel => {
                        state.stats.sentinels_popped += 1;
                        Popped::Sentinel
                    }
                };
                drop(state);
                self.not_full.notify_one();
                return Ok(popped);
            }

            if state.closed && state.sentinels_owed == 0 {
                // Every sentinel has been handed out: one consumer too many.
                return Err(self.misuse("pop on a closed and drained queue"));
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Enqueue exactly `consumers` sentinels, one per downstream worker.
    ///
    /// Blocks for space like `push`. Closing twice is a misuse.
    pub fn close(&self, consumers: usize) -> PipelineResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(self.misuse("closed twice"));
        }
        state.closed = true;
        state.sentinels_owed = consumers;

        for _ in 0..consumers {
            state = self.wait_for_space(state)?;
            state.slots.push_back(Slot::Sentinel);
            state.sentinels_owed -= 1;
            state.stats.sentinels_pushed += 1;
            Self::note_len(&mut state);
            self.not_empty.notify_one();
        }

        tracing::trace!(queue = %self.name, consumers, "queue closed");
        Ok(())
    }

    /// Wake every blocked producer and consumer; all later calls fail fast.
    pub fn abort(&self) {
        let mut state = self.lock();
        if state.aborted {
            return;
        }
        state.aborted = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn wait_for_space<'a>(
        &'a self,
        mut state: MutexGuard<'a, QueueState<T>>,
    ) -> PipelineResult<MutexGuard<'a, QueueState<T>>> {
        if state.aborted {
            return Err(PipelineError::Aborted);
        }
        if state.slots.len() < self.capacity {
            return Ok(state);
        }

        let started = Instant::now();
        while state.slots.len() >= self.capacity && !state.aborted {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.stats.blocked_pushes += 1;
        state.stats.push_wait_us += duration_us(started.elapsed());

        if state.aborted {
            return Err(PipelineError::Aborted);
        }
        Ok(state)
    }

    fn note_len(state: &mut QueueState<T>) {
        let len = state.slots.len();
        if len > state.stats.high_water {
            state.stats.high_water = len;
        }
    }

    fn misuse(&self, message: &str) -> PipelineError {
        PipelineError::QueueClosedMisuse {
            queue: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
