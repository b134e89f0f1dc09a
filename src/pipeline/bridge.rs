//! Thread boundary between a running pipeline and its caller.
//!
//! Workers report progress as [`PipelineEvent`]s over a crossbeam channel.
//! Sending never blocks a worker: the channel is unbounded and a dropped
//! receiver is ignored.
//!
//! Unlike the inter-stage queues the event channel is not bounded. A caller
//! that enables events must keep draining them; otherwise the backlog grows
//! by roughly two events per item for the length of the run.

use crate::pipeline::error::ErrorKind;
use crate::pipeline::executor::RunStatus;
use crate::pipeline::id::SeqNo;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Progress messages emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// All worker threads are up.
    Started { threads: usize },

    /// The source ingested an item.
    Ingested { seq: SeqNo, key: String },

    /// The sink persisted an item.
    Saved { seq: SeqNo, key: String },

    /// An item will not reach the output.
    Dropped { seq: Option<SeqNo>, kind: ErrorKind },

    /// A fatal error triggered the abort flag.
    Aborted { reason: String },

    /// Every thread has joined.
    Finished { status: RunStatus },
}

/// Worker-side handle. Cloned into every thread.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventEmitter {
    /// Emitter that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

/// Caller-side end of the event stream.
pub struct ProgressReceiver {
    rx: Receiver<PipelineEvent>,
}

impl ProgressReceiver {
    /// Create a connected emitter/receiver pair.
    ///
    /// The channel is unbounded so that workers never block on progress
    /// reporting; drain it while the run is in flight.
    pub fn channel() -> (EventEmitter, ProgressReceiver) {
        let (tx, rx) = unbounded();
        (EventEmitter::new(tx), ProgressReceiver { rx })
    }

    /// Block for the next event. `None` once every emitter is gone.
    pub fn recv(&self) -> Option<PipelineEvent> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PipelineEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Drain all pending events without blocking.
    pub fn drain(&self) -> Vec<PipelineEvent> {
        self.rx.try_iter().collect()
    }

    /// Iterate until the stream closes.
    pub fn iter(&self) -> impl Iterator<Item = PipelineEvent> + '_ {
        self.rx.iter()
    }
}
