//! Stage descriptors.
//!
//! Stages differ only in configuration: a kind, a worker count and an
//! ordering mode, plus a transform closure for transform stages. There is no
//! per-stage type hierarchy; the orchestrator picks the worker body from
//! [`StageKind`].

use crate::imaging::filters::TransformFn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default capacity of every inter-stage queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 24;

/// Role of a stage in the linear chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Transform,
    Sink,
}

/// Output ordering contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    /// Persist in ingestion order, restored by the sink's reorder buffer.
    #[default]
    Preserve,
    /// Persist in arrival order.
    Any,
}

impl fmt::Display for OrderingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingMode::Preserve => f.write_str("preserve"),
            OrderingMode::Any => f.write_str("any"),
        }
    }
}

impl FromStr for OrderingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" | "ordered" => Ok(OrderingMode::Preserve),
            "any" | "unordered" => Ok(OrderingMode::Any),
            other => Err(format!(
                "unknown ordering mode '{}' (expected 'preserve' or 'any')",
                other
            )),
        }
    }
}

/// Immutable description of one stage, fixed before the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub name: String,
    pub kind: StageKind,
    /// Number of worker threads, at least 1.
    pub workers: usize,
    pub ordering: OrderingMode,
}

impl StageDescriptor {
    /// The single-threaded source stage.
    pub fn source() -> Self {
        Self {
            name: "source".to_string(),
            kind: StageKind::Source,
            workers: 1,
            ordering: OrderingMode::Preserve,
        }
    }

    /// The single-threaded sink stage.
    pub fn sink(ordering: OrderingMode) -> Self {
        Self {
            name: "sink".to_string(),
            kind: StageKind::Sink,
            workers: 1,
            ordering,
        }
    }

    /// A parallel transform stage. Workers complete out of order.
    pub fn transform(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Transform,
            workers,
            ordering: OrderingMode::Any,
        }
    }

    pub fn worker_name(&self, index: usize) -> String {
        if self.workers == 1 {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, index)
        }
    }
}

/// A transform stage ready to be wired: descriptor, closure and the capacity
/// of the queue it writes to.
#[derive(Clone)]
pub struct TransformStage {
    pub descriptor: StageDescriptor,
    pub transform: TransformFn,
    pub queue_capacity: usize,
}

impl TransformStage {
    /// One worker per hardware thread by default.
    pub fn new(name: impl Into<String>, transform: TransformFn) -> Self {
        Self {
            descriptor: StageDescriptor::transform(name, default_workers()),
            transform,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.descriptor.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformStage")
            .field("descriptor", &self.descriptor)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Hardware parallelism, never less than 2.
pub fn default_workers() -> usize {
    num_cpus::get().max(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::filters::{transform_fn, vertical_flip};

    #[test]
    fn test_ordering_mode_parse() {
        assert_eq!("preserve".parse::<OrderingMode>(), Ok(OrderingMode::Preserve));
        assert_eq!("ANY".parse::<OrderingMode>(), Ok(OrderingMode::Any));
        assert!("sorted".parse::<OrderingMode>().is_err());
        assert_eq!(OrderingMode::default(), OrderingMode::Preserve);
    }

    #[test]
    fn test_default_workers_at_least_two() {
        assert!(default_workers() >= 2);
        let stage = TransformStage::new("flip", transform_fn(vertical_flip));
        assert!(stage.descriptor.workers >= 2);
        assert_eq!(stage.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_worker_names() {
        let stage = StageDescriptor::transform("upscale", 3);
        assert_eq!(stage.worker_name(2), "upscale-2");
        assert_eq!(StageDescriptor::source().worker_name(0), "source");
    }
}
