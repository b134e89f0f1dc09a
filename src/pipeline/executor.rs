//! Pipeline orchestrator.
//!
//! Wires `Source -> Transform* -> Sink` through bounded queues, starts one OS
//! thread per worker, joins every thread and folds the shared run state into a
//! [`RunReport`].
//!
//! ```text
//! [source] ──q0──► [stage 1 × W1] ──q1──► … ──qN──► [sink + reorder]
//! ```
//!
//! Threads are started downstream first (sink, last transform stage, …,
//! source) so that every consumer is waiting before data flows. A spawn
//! failure aborts the run; the threads already started are released through
//! the abort flag and still joined before `run` returns.

use crate::config::PipelineConfig;
use crate::imaging::{ImageSink, ImageSource};
use crate::pipeline::bridge::{EventEmitter, PipelineEvent};
use crate::pipeline::context::{ItemQueue, PipelineContext};
use crate::pipeline::error::{ErrorRecord, PipelineError, PipelineResult};
use crate::pipeline::queue::QueueStats;
use crate::pipeline::sink::SinkTask;
use crate::pipeline::source::SourceTask;
use crate::pipeline::stage::{
    OrderingMode, StageDescriptor, TransformStage, DEFAULT_QUEUE_CAPACITY,
};
use crate::pipeline::worker::{OsSpawner, Spawner, StageShutdown, WorkerPool};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No errors at all.
    Success,
    /// The run completed but this many items are missing from the output.
    PartialSuccess(usize),
    /// The abort flag was raised.
    Fatal(String),
}

impl RunStatus {
    /// Process exit code: 0 unless the run was fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::PartialSuccess(_) => 0,
            RunStatus::Fatal(_) => 1,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RunStatus::Fatal(_))
    }
}

/// Stats of one inter-stage queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub name: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

/// Everything the caller learns about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub errors: Vec<ErrorRecord>,
    pub stages: Vec<StageDescriptor>,
    pub items_produced: u64,
    pub items_saved: u64,
    /// Items buffered at the sink when an abort stopped it.
    pub items_discarded: u64,
    pub threads_spawned: usize,
    pub threads_joined: usize,
    pub threads_panicked: usize,
    pub reorder_high_water: usize,
    pub elapsed_ms: u64,
    pub queues: Vec<QueueReport>,
}

impl RunReport {
    /// Items missing from the output because of a recorded failure.
    pub fn dropped_count(&self) -> usize {
        self.errors.iter().filter(|e| e.drops_item()).count()
    }

    /// Whether every started thread was joined.
    pub fn threads_balanced(&self) -> bool {
        self.threads_spawned == self.threads_joined
    }

    /// Write the report as pretty JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> crate::error::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    fn failed_before_start(stages: Vec<StageDescriptor>, stage: &str, err: PipelineError) -> Self {
        tracing::error!("Pipeline could not start: {}", err);
        Self {
            status: RunStatus::Fatal(err.to_string()),
            errors: vec![ErrorRecord::new(stage, &err)],
            stages,
            items_produced: 0,
            items_saved: 0,
            items_discarded: 0,
            threads_spawned: 0,
            threads_joined: 0,
            threads_panicked: 0,
            reorder_high_water: 0,
            elapsed_ms: 0,
            queues: Vec::new(),
        }
    }
}

/// Builder for a [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<TransformStage>,
    ordering: OrderingMode,
    source_capacity: usize,
    limit: Option<u64>,
    spawner: Arc<dyn Spawner>,
    events: EventEmitter,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            ordering: OrderingMode::default(),
            source_capacity: DEFAULT_QUEUE_CAPACITY,
            limit: None,
            spawner: Arc::new(OsSpawner),
            events: EventEmitter::disabled(),
        }
    }

    /// Start from a validated configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut builder = Self::new()
            .ordering(config.ordering)
            .source_capacity(config.source_capacity)
            .limit(config.limit);
        for stage in &config.stages {
            builder = builder.stage(stage.to_transform_stage());
        }
        builder
    }

    /// Append a transform stage to the chain.
    pub fn stage(mut self, stage: TransformStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn ordering(mut self, ordering: OrderingMode) -> Self {
        self.ordering = ordering;
        self
    }

    /// Capacity of the queue between the source and the first stage.
    pub fn source_capacity(mut self, capacity: usize) -> Self {
        self.source_capacity = capacity;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        for stage in &self.stages {
            if stage.descriptor.workers == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "stage '{}' needs at least one worker",
                    stage.name()
                )));
            }
        }
        Ok(Pipeline {
            stages: self.stages,
            ordering: self.ordering,
            source_capacity: self.source_capacity,
            limit: self.limit,
            spawner: self.spawner,
            events: self.events,
        })
    }
}

/// A configured, not yet started pipeline.
pub struct Pipeline {
    stages: Vec<TransformStage>,
    ordering: OrderingMode,
    source_capacity: usize,
    limit: Option<u64>,
    spawner: Arc<dyn Spawner>,
    events: EventEmitter,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Descriptors of every stage, source and sink included.
    pub fn descriptors(&self) -> Vec<StageDescriptor> {
        let mut all = Vec::with_capacity(self.stages.len() + 2);
        all.push(StageDescriptor::source());
        all.extend(self.stages.iter().map(|s| s.descriptor.clone()));
        all.push(StageDescriptor::sink(self.ordering));
        all
    }

    /// Total number of worker threads a run starts.
    pub fn thread_count(&self) -> usize {
        self.descriptors().iter().map(|d| d.workers).sum()
    }

    /// Run to completion. Blocks until every thread has joined.
    pub fn run<S, K>(self, source: S, sink: K) -> RunReport
    where
        S: ImageSource + 'static,
        K: ImageSink + 'static,
    {
        let started = Instant::now();
        let descriptors = self.descriptors();

        tracing::info!(
            "Starting pipeline: {} transform stages, {} threads, {} order",
            self.stages.len(),
            self.thread_count(),
            self.ordering
        );

        let queues = match self.build_queues() {
            Ok(queues) => queues,
            Err(err) => return RunReport::failed_before_start(descriptors, "orchestrator", err),
        };
        let ctx = Arc::new(PipelineContext::new(queues.clone(), self.events.clone()));

        let pools = self.start_threads(&ctx, &queues, Box::new(source), Box::new(sink));
        if !ctx.is_aborted() {
            self.events.emit(PipelineEvent::Started {
                threads: ctx.counters.threads_spawned.load(Ordering::Acquire),
            });
        }

        let joined: usize = pools.into_iter().map(|pool| pool.join(&ctx)).sum();
        let spawned = ctx.counters.threads_spawned.load(Ordering::Acquire);
        if joined != spawned {
            tracing::error!("Joined {} of {} worker threads", joined, spawned);
        }

        let report = Self::build_report(&ctx, &queues, descriptors, started);
        tracing::info!(
            "Pipeline finished in {} ms: {:?} ({} saved, {} errors)",
            report.elapsed_ms,
            report.status,
            report.items_saved,
            report.errors.len()
        );
        self.events.emit(PipelineEvent::Finished {
            status: report.status.clone(),
        });
        report
    }

    fn build_queues(&self) -> PipelineResult<Vec<Arc<ItemQueue>>> {
        let mut queues = Vec::with_capacity(self.stages.len() + 1);
        let first_consumer = self
            .stages
            .first()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| "sink".to_string());
        queues.push(Arc::new(ItemQueue::new(
            format!("source->{}", first_consumer),
            self.source_capacity,
        )?));

        for (i, stage) in self.stages.iter().enumerate() {
            let consumer = self
                .stages
                .get(i + 1)
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| "sink".to_string());
            queues.push(Arc::new(ItemQueue::new(
                format!("{}->{}", stage.name(), consumer),
                stage.queue_capacity,
            )?));
        }
        Ok(queues)
    }

    /// Workers reading from queue `index`.
    fn consumers_of(&self, index: usize) -> usize {
        self.stages
            .get(index)
            .map(|s| s.descriptor.workers)
            .unwrap_or(1)
    }

    fn start_threads(
        &self,
        ctx: &Arc<PipelineContext>,
        queues: &[Arc<ItemQueue>],
        source: Box<dyn ImageSource>,
        sink: Box<dyn ImageSink>,
    ) -> Vec<WorkerPool> {
        let spawner = self.spawner.as_ref();
        let mut pools = Vec::with_capacity(self.stages.len() + 2);

        // Sink
        let sink_desc = StageDescriptor::sink(self.ordering);
        let mut sink_pool = WorkerPool::new(sink_desc.clone());
        let sink_task = SinkTask {
            stage: sink_desc.name.clone(),
            sink,
            input: queues[self.stages.len()].clone(),
            ordering: self.ordering,
            ctx: ctx.clone(),
        };
        let result = sink_pool.spawn(
            spawner,
            ctx,
            sink_desc.worker_name(0),
            Box::new(move || sink_task.run()),
        );
        pools.push(sink_pool);
        if let Err(err) = result {
            ctx.abort(&sink_desc.name, err);
            return pools;
        }

        // Transform stages, last to first
        for (i, stage) in self.stages.iter().enumerate().rev() {
            let shutdown = Arc::new(StageShutdown::new(
                stage.descriptor.workers,
                queues[i + 1].clone(),
                self.consumers_of(i + 1),
            ));
            let mut pool = WorkerPool::new(stage.descriptor.clone());
            let result = pool.start_transform(
                spawner,
                ctx,
                &stage.transform,
                &queues[i],
                &queues[i + 1],
                &shutdown,
            );
            pools.push(pool);
            if let Err(err) = result {
                ctx.abort(stage.name(), err);
                return pools;
            }
        }

        // Source
        let source_desc = StageDescriptor::source();
        let mut source_pool = WorkerPool::new(source_desc.clone());
        let source_task = SourceTask {
            stage: source_desc.name.clone(),
            source,
            output: queues[0].clone(),
            downstream_consumers: self.consumers_of(0),
            limit: self.limit,
            ctx: ctx.clone(),
        };
        let result = source_pool.spawn(
            spawner,
            ctx,
            source_desc.worker_name(0),
            Box::new(move || source_task.run()),
        );
        pools.push(source_pool);
        if let Err(err) = result {
            ctx.abort(&source_desc.name, err);
        }

        pools
    }

    fn build_report(
        ctx: &PipelineContext,
        queues: &[Arc<ItemQueue>],
        stages: Vec<StageDescriptor>,
        started: Instant,
    ) -> RunReport {
        let errors = ctx.error_list();
        let dropped = errors.iter().filter(|e| e.drops_item()).count();

        let status = match ctx.fatal_reason() {
            Some(reason) => RunStatus::Fatal(reason),
            None if errors.is_empty() => RunStatus::Success,
            None => RunStatus::PartialSuccess(dropped),
        };

        let counters = &ctx.counters;
        RunReport {
            status,
            errors,
            stages,
            items_produced: counters.produced.load(Ordering::Acquire),
            items_saved: counters.saved.load(Ordering::Acquire),
            items_discarded: counters.discarded.load(Ordering::Acquire),
            threads_spawned: counters.threads_spawned.load(Ordering::Acquire),
            threads_joined: counters.threads_joined.load(Ordering::Acquire),
            threads_panicked: counters.threads_panicked.load(Ordering::Acquire),
            reorder_high_water: counters.reorder_high_water.load(Ordering::Acquire),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            queues: queues
                .iter()
                .map(|q| QueueReport {
                    name: q.name().to_string(),
                    stats: q.stats(),
                })
                .collect(),
        }
    }
}
