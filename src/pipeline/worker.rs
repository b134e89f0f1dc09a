//! Worker threads and worker pools.
//!
//! Every worker is one OS thread created through a [`Spawner`]. A
//! [`WorkerPool`] owns the join handles of one stage; the orchestrator owns
//! all pools for the lifetime of the run and joins them together.
//!
//! # Transform loop
//!
//! ```text
//! loop {
//!     abort flag set?      -> stop
//!     pop input            -> Sentinel / Aborted: stop
//!     transform item       -> error: record + announce drop, continue
//!     push output          -> keeps seq and key of the input
//! }
//! last worker of the stage out -> close(output, downstream workers)
//! ```

use crate::imaging::filters::TransformFn;
use crate::pipeline::context::{ItemQueue, PipelineContext};
use crate::pipeline::error::{PipelineError, PipelineResult, TransformError};
use crate::pipeline::queue::Popped;
use crate::pipeline::stage::StageDescriptor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Body of a worker thread.
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Seam through which the orchestrator creates threads.
pub trait Spawner: Send + Sync {
    fn spawn(&self, name: &str, body: WorkerBody) -> std::io::Result<JoinHandle<()>>;
}

/// Named OS threads via `std::thread::Builder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl Spawner for OsSpawner {
    fn spawn(&self, name: &str, body: WorkerBody) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name.to_string()).spawn(body)
    }
}

/// Shutdown countdown shared by the workers of one stage.
///
/// The worker that brings the count to zero closes the output queue with one
/// sentinel per downstream consumer, so shutdown propagates exactly once per
/// stage transition whichever worker finishes last.
pub struct StageShutdown {
    remaining: AtomicUsize,
    output: Arc<ItemQueue>,
    downstream_consumers: usize,
}

impl StageShutdown {
    pub fn new(workers: usize, output: Arc<ItemQueue>, downstream_consumers: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(workers),
            output,
            downstream_consumers,
        }
    }

    /// Called once by every worker on exit. Returns whether this call closed
    /// the output queue.
    pub fn worker_done(&self) -> PipelineResult<bool> {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(false);
        }
        self.output.close(self.downstream_consumers)?;
        Ok(true)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

/// Everything one transform worker needs, built before its thread starts.
pub struct TransformTask {
    pub stage: String,
    pub worker: String,
    pub transform: TransformFn,
    pub input: Arc<ItemQueue>,
    pub output: Arc<ItemQueue>,
    pub shutdown: Arc<StageShutdown>,
    pub ctx: Arc<PipelineContext>,
}

impl TransformTask {
    pub fn run(self) {
        tracing::debug!("Worker '{}' started", self.worker);
        let mut processed = 0u64;

        while !self.ctx.is_aborted() {
            let item = match self.input.pop() {
                Ok(Popped::Item(item)) => item,
                Ok(Popped::Sentinel) | Ok(Popped::Aborted) => break,
                Err(e) => {
                    self.ctx.abort(&self.stage, e);
                    break;
                }
            };

            let seq = item.seq;
            let result = catch_unwind(AssertUnwindSafe(|| (self.transform)(&item.image)))
                .unwrap_or_else(|_| {
                    Err(TransformError::Malformed("transform panicked".to_string()))
                });

            match result {
                Ok(image) => {
                    processed += 1;
                    match self.output.push(item.with_image(image)) {
                        Ok(()) => {}
                        Err(PipelineError::Aborted) => break,
                        Err(e) => {
                            self.ctx.abort(&self.stage, e);
                            break;
                        }
                    }
                }
                Err(source) => {
                    drop(item);
                    self.ctx.record_dropped(
                        &self.stage,
                        PipelineError::Transform {
                            stage: self.stage.clone(),
                            seq,
                            source,
                        },
                    );
                }
            }
        }

        finish_stage(&self.shutdown, &self.stage, &self.ctx);
        tracing::debug!("Worker '{}' exiting after {} items", self.worker, processed);
    }
}

/// Take part in the stage countdown; an aborted output queue is expected.
pub(crate) fn finish_stage(shutdown: &StageShutdown, stage: &str, ctx: &PipelineContext) {
    match shutdown.worker_done() {
        Ok(true) => tracing::debug!("Stage '{}' closed its output", stage),
        Ok(false) | Err(PipelineError::Aborted) => {}
        Err(e) => ctx.abort(stage, e),
    }
}

/// Join handles of one stage's workers.
pub struct WorkerPool {
    descriptor: StageDescriptor,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(descriptor: StageDescriptor) -> Self {
        let capacity = descriptor.workers;
        Self {
            descriptor,
            handles: Vec::with_capacity(capacity),
        }
    }

    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    /// Threads started so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Start one worker thread running `body`.
    pub fn spawn(
        &mut self,
        spawner: &dyn Spawner,
        ctx: &PipelineContext,
        worker: String,
        body: WorkerBody,
    ) -> PipelineResult<()> {
        let handle = spawner
            .spawn(&worker, body)
            .map_err(|e| PipelineError::ThreadSpawn {
                thread: worker.clone(),
                message: e.to_string(),
            })?;
        ctx.counters.threads_spawned.fetch_add(1, Ordering::AcqRel);
        self.handles.push((worker, handle));
        Ok(())
    }

    /// Start every transform worker of the stage. Stops at the first spawn
    /// failure; threads already started stay in the pool to be joined.
    pub fn start_transform(
        &mut self,
        spawner: &dyn Spawner,
        ctx: &Arc<PipelineContext>,
        transform: &TransformFn,
        input: &Arc<ItemQueue>,
        output: &Arc<ItemQueue>,
        shutdown: &Arc<StageShutdown>,
    ) -> PipelineResult<()> {
        for index in 0..self.descriptor.workers {
            let worker = self.descriptor.worker_name(index);
            let task = TransformTask {
                stage: self.descriptor.name.clone(),
                worker: worker.clone(),
                transform: transform.clone(),
                input: input.clone(),
                output: output.clone(),
                shutdown: shutdown.clone(),
                ctx: ctx.clone(),
            };
            self.spawn(spawner, ctx, worker, Box::new(move || task.run()))?;
        }
        Ok(())
    }

    /// Join every started thread. Returns the number joined.
    pub fn join(self, ctx: &PipelineContext) -> usize {
        let mut joined = 0;
        for (worker, handle) in self.handles {
            if handle.join().is_err() {
                tracing::error!("Worker '{}' panicked", worker);
                ctx.counters.threads_panicked.fetch_add(1, Ordering::AcqRel);
            }
            ctx.counters.threads_joined.fetch_add(1, Ordering::AcqRel);
            joined += 1;
        }
        joined
    }
}
