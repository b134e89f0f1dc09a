//! Source stage: the single producer at the head of the chain.

use crate::imaging::ImageSource;
use crate::pipeline::bridge::PipelineEvent;
use crate::pipeline::context::{ItemQueue, PipelineContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::SeqNo;
use crate::types::Item;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Per-thread record of the source worker.
pub struct SourceTask {
    pub stage: String,
    pub source: Box<dyn ImageSource>,
    pub output: Arc<ItemQueue>,
    /// Workers of the first transform stage (1 when the sink follows directly).
    pub downstream_consumers: usize,
    /// Stop after this many items.
    pub limit: Option<u64>,
    pub ctx: Arc<PipelineContext>,
}

impl SourceTask {
    pub fn run(mut self) {
        tracing::debug!("Source '{}' started", self.stage);
        let mut seq = SeqNo::ZERO;

        loop {
            if self.ctx.is_aborted() {
                break;
            }
            if self.limit.is_some_and(|limit| seq.value() >= limit) {
                tracing::info!("Source reached its limit of {} items", seq.value());
                break;
            }

            let image = match self.source.next_image() {
                Ok(Some(image)) => image,
                Ok(None) => break,
                Err(e) => {
                    self.ctx
                        .record(&self.stage, PipelineError::Source(e.to_string()));
                    break;
                }
            };

            let item = Item::ingest(seq, image);
            let key = self.ctx.events().is_enabled().then(|| item.key.clone());
            match self.output.push(item) {
                Ok(()) => {}
                Err(PipelineError::Aborted) => break,
                Err(e) => {
                    self.ctx.abort(&self.stage, e);
                    break;
                }
            }

            self.ctx.counters.produced.fetch_add(1, Ordering::AcqRel);
            if let Some(key) = key {
                self.ctx.events().emit(PipelineEvent::Ingested { seq, key });
            }
            seq = seq.next();
        }

        match self.output.close(self.downstream_consumers) {
            Ok(()) | Err(PipelineError::Aborted) => {}
            Err(e) => self.ctx.abort(&self.stage, e),
        }
        tracing::debug!("Source '{}' exiting after {} items", self.stage, seq.value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::MemorySource;
    use crate::pipeline::bridge::EventEmitter;
    use crate::pipeline::error::ErrorKind;
    use crate::pipeline::queue::Popped;

    fn run_source(source: MemorySource, limit: Option<u64>) -> (Vec<u64>, Arc<PipelineContext>) {
        let output = Arc::new(ItemQueue::new("source->sink", 64).unwrap());
        let ctx = Arc::new(PipelineContext::new(
            vec![output.clone()],
            EventEmitter::disabled(),
        ));
        SourceTask {
            stage: "source".into(),
            source: Box::new(source),
            output: output.clone(),
            downstream_consumers: 2,
            limit,
            ctx: ctx.clone(),
        }
        .run();

        let mut seqs = Vec::new();
        let mut sentinels = 0;
        while sentinels < 2 {
            match output.pop().unwrap() {
                Popped::Item(item) => seqs.push(item.seq.value()),
                Popped::Sentinel => sentinels += 1,
                Popped::Aborted => unreachable!(),
            }
        }
        (seqs, ctx)
    }

    #[test]
    fn test_assigns_consecutive_sequence_numbers() {
        let (seqs, ctx) = run_source(MemorySource::synthetic(4, 2, 2), None);
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(ctx.counters.produced.load(Ordering::Acquire), 4);
        assert!(ctx.error_list().is_empty());
    }

    #[test]
    fn test_limit_caps_ingestion() {
        let (seqs, _) = run_source(MemorySource::synthetic(10, 2, 2), Some(3));
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_enumerator_failure_ends_input() {
        let (seqs, ctx) = run_source(MemorySource::synthetic(10, 2, 2).fail_after(2), None);
        assert_eq!(seqs, vec![0, 1]);
        let errors = ctx.error_list();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::SourceFailure);
        assert!(!ctx.is_aborted());
    }
}
