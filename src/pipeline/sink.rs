//! Sink stage: persists items, restoring ingestion order when asked to.

use crate::imaging::ImageSink;
use crate::pipeline::bridge::PipelineEvent;
use crate::pipeline::context::{ItemQueue, PipelineContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::Popped;
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::stage::OrderingMode;
use crate::types::Item;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Per-thread record of the sink worker.
pub struct SinkTask {
    pub stage: String,
    pub sink: Box<dyn ImageSink>,
    pub input: Arc<ItemQueue>,
    pub ordering: OrderingMode,
    pub ctx: Arc<PipelineContext>,
}

impl SinkTask {
    pub fn run(mut self) {
        tracing::debug!("Sink '{}' started ({} order)", self.stage, self.ordering);
        let mut reorder = ReorderBuffer::new();

        loop {
            match self.input.pop() {
                Ok(Popped::Item(item)) => {
                    if self.ordering == OrderingMode::Any {
                        self.persist(item);
                        continue;
                    }
                    self.absorb_drops(&mut reorder);
                    if let Err(e) = reorder.insert(item.seq, item) {
                        self.ctx
                            .abort(&self.stage, PipelineError::Consistency(e.to_string()));
                        break;
                    }
                    while let Some((_, ready)) = reorder.pop_ready() {
                        self.persist(ready);
                    }
                }
                Ok(Popped::Sentinel) => {
                    self.flush(&mut reorder);
                    break;
                }
                Ok(Popped::Aborted) => break,
                Err(e) => {
                    self.ctx.abort(&self.stage, e);
                    break;
                }
            }
        }

        if !reorder.is_empty() {
            tracing::warn!(
                "Sink discarding {} buffered items after abort",
                reorder.len()
            );
            self.ctx
                .counters
                .discarded
                .fetch_add(reorder.len() as u64, Ordering::AcqRel);
        }
        self.ctx
            .counters
            .reorder_high_water
            .fetch_max(reorder.high_water(), Ordering::AcqRel);
        tracing::debug!("Sink '{}' exiting", self.stage);
    }

    /// Upstream is done: release whatever is still held, in order.
    fn flush(&mut self, reorder: &mut ReorderBuffer<Item>) {
        // Grace check: the sentinel is queued after every item, so nothing
        // may follow it.
        if !self.input.is_empty() {
            self.ctx.abort(
                &self.stage,
                PipelineError::Consistency(format!(
                    "{} entries behind the sink's sentinel",
                    self.input.len()
                )),
            );
            return;
        }

        self.absorb_drops(reorder);
        while let Some((_, ready)) = reorder.pop_ready() {
            self.persist(ready);
        }

        let remaining = reorder.drain_remaining();
        for gap in remaining.gaps {
            if !self.ctx.has_error_for(gap) {
                self.ctx.record_gap(&self.stage, gap);
            }
        }
        for (_, item) in remaining.items {
            self.persist(item);
        }
    }

    fn absorb_drops(&self, reorder: &mut ReorderBuffer<Item>) {
        for seq in self.ctx.take_dropped() {
            reorder.skip(seq);
        }
    }

    fn persist(&mut self, item: Item) {
        match self.sink.save(&item) {
            Ok(()) => {
                self.ctx.counters.saved.fetch_add(1, Ordering::AcqRel);
                self.ctx.events().emit(PipelineEvent::Saved {
                    seq: item.seq,
                    key: item.key,
                });
            }
            Err(e) => self.ctx.record(
                &self.stage,
                PipelineError::Io {
                    seq: item.seq,
                    key: item.key,
                    message: e.to_string(),
                },
            ),
        }
    }
}
