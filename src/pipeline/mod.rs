//! Multi-stage concurrent image pipeline.
//!
//! Images flow through a linear chain of stages connected by bounded
//! blocking queues: one Source thread, any number of Transform stages each
//! backed by a pool of worker threads, and one Sink thread.
//!
//! # Architecture
//!
//! ```text
//! [Source] ──q0──► [Transform × W] ──q1──► … ──► [Sink + ReorderBuffer]
//! ```
//!
//! # Design
//!
//! - **Backpressure**: every queue has a fixed capacity; a full queue blocks
//!   its producers.
//! - **Poison pills**: a finished stage closes its output with one sentinel
//!   per downstream worker.
//! - **Sequence numbers**: assigned once at ingestion and never changed, so
//!   the sink can restore input order after out-of-order workers.
//! - **Explicit context**: error list, abort flag and counters live in a
//!   per-run [`PipelineContext`], never in globals.

pub mod bridge;
pub mod context;
pub mod error;
pub mod executor;
pub mod id;
pub mod queue;
pub mod reorder;
pub mod sink;
pub mod source;
pub mod stage;
pub mod worker;

pub use bridge::{EventEmitter, PipelineEvent, ProgressReceiver};
pub use context::{ItemQueue, PipelineContext, RunCounters};
pub use error::{ErrorKind, ErrorRecord, PipelineError, PipelineResult, TransformError};
pub use executor::{Pipeline, PipelineBuilder, QueueReport, RunReport, RunStatus};
pub use id::SeqNo;
pub use queue::{BoundedQueue, Popped, QueueStats};
pub use reorder::{ReorderBuffer, ReorderError};
pub use stage::{
    default_workers, OrderingMode, StageDescriptor, StageKind, TransformStage,
    DEFAULT_QUEUE_CAPACITY,
};
pub use worker::{OsSpawner, Spawner, StageShutdown, WorkerBody, WorkerPool};
