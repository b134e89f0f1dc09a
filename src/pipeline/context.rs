//! Per-run shared state.
//!
//! A [`PipelineContext`] is built by the orchestrator for one run and handed
//! to every worker as an `Arc`. Besides the queues it is the only state
//! shared across threads:
//!
//! - the abort flag (atomic) and the first fatal reason,
//! - the append-only error list (mutex),
//! - item and thread counters (atomics),
//! - the drop channel announcing sequence numbers that will never reach the
//!   sink, so the reorder buffer can skip them early.

use crate::pipeline::bridge::{EventEmitter, PipelineEvent};
use crate::pipeline::error::{ErrorRecord, PipelineError};
use crate::pipeline::id::SeqNo;
use crate::pipeline::queue::BoundedQueue;
use crate::types::Item;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Queue type used between stages.
pub type ItemQueue = BoundedQueue<Item>;

/// Counters read by the orchestrator after all threads joined.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub produced: AtomicU64,
    pub saved: AtomicU64,
    /// Items still buffered at the sink when an abort stopped it.
    pub discarded: AtomicU64,
    pub threads_spawned: AtomicUsize,
    pub threads_joined: AtomicUsize,
    pub threads_panicked: AtomicUsize,
    pub reorder_high_water: AtomicUsize,
}

/// Explicit pipeline context, one per run.
pub struct PipelineContext {
    queues: Vec<Arc<ItemQueue>>,
    abort: AtomicBool,
    fatal_reason: Mutex<Option<String>>,
    errors: Mutex<Vec<ErrorRecord>>,
    dropped_tx: Sender<SeqNo>,
    dropped_rx: Receiver<SeqNo>,
    pub counters: RunCounters,
    events: EventEmitter,
}

impl PipelineContext {
    pub fn new(queues: Vec<Arc<ItemQueue>>, events: EventEmitter) -> Self {
        let (dropped_tx, dropped_rx) = unbounded();
        Self {
            queues,
            abort: AtomicBool::new(false),
            fatal_reason: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            dropped_tx,
            dropped_rx,
            counters: RunCounters::default(),
            events,
        }
    }

    pub fn queues(&self) -> &[Arc<ItemQueue>] {
        &self.queues
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Record a fatal error, raise the abort flag and wake every queue.
    ///
    /// Only the first reason is kept; later calls still append to the list.
    pub fn abort(&self, stage: &str, err: PipelineError) {
        let record = ErrorRecord::new(stage, &err);
        self.errors().push(record);

        let first = {
            let mut reason = lock(&self.fatal_reason);
            if reason.is_none() {
                *reason = Some(err.to_string());
                true
            } else {
                false
            }
        };
        self.abort.store(true, Ordering::Release);

        if first {
            tracing::error!("Pipeline aborted by stage '{}': {}", stage, err);
            self.events.emit(PipelineEvent::Aborted {
                reason: err.to_string(),
            });
        }

        for queue in &self.queues {
            queue.abort();
        }
    }

    /// Record a per-item failure. The run continues.
    pub fn record(&self, stage: &str, err: PipelineError) {
        tracing::warn!("Stage '{}': {}", stage, err);
        let record = ErrorRecord::new(stage, &err);
        self.events.emit(PipelineEvent::Dropped {
            seq: record.seq,
            kind: record.kind,
        });
        self.errors().push(record);
    }

    /// Record a failure that removed an item before the sink, and announce
    /// the hole on the drop channel.
    pub fn record_dropped(&self, stage: &str, err: PipelineError) {
        let seq = err.seq();
        self.record(stage, err);
        if let Some(seq) = seq {
            let _ = self.dropped_tx.send(seq);
        }
    }

    /// Record a hole the sink found without an earlier explanation.
    pub fn record_gap(&self, stage: &str, seq: SeqNo) {
        tracing::warn!("Stage '{}': {} missing from output", stage, seq);
        let record = ErrorRecord::gap(stage, seq);
        self.events.emit(PipelineEvent::Dropped {
            seq: Some(seq),
            kind: record.kind,
        });
        self.errors().push(record);
    }

    /// Sequence numbers announced as dropped since the last call.
    pub fn take_dropped(&self) -> Vec<SeqNo> {
        self.dropped_rx.try_iter().collect()
    }

    /// Whether some recorded error already accounts for `seq`.
    pub fn has_error_for(&self, seq: SeqNo) -> bool {
        self.errors().iter().any(|r| r.seq == Some(seq))
    }

    pub fn fatal_reason(&self) -> Option<String> {
        lock(&self.fatal_reason).clone()
    }

    /// Copy of the error list.
    pub fn error_list(&self) -> Vec<ErrorRecord> {
        self.errors().clone()
    }

    fn errors(&self) -> MutexGuard<'_, Vec<ErrorRecord>> {
        lock(&self.errors)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
