//! Pipeline-specific error types.
//!
//! Two layers: [`PipelineError`] is what functions return; [`ErrorRecord`] is
//! what workers append to the shared error list so the caller sees every
//! failure of the run after all threads have joined.

use crate::pipeline::id::SeqNo;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Queue '{queue}' used after close: {message}")]
    QueueClosedMisuse { queue: String, message: String },

    #[error("Transform '{stage}' failed on {seq}: {source}")]
    Transform {
        stage: String,
        seq: SeqNo,
        #[source]
        source: TransformError,
    },

    #[error("Failed to save {seq} ({key}): {message}")]
    Io {
        seq: SeqNo,
        key: String,
        message: String,
    },

    #[error("Failed to spawn thread '{thread}': {message}")]
    ThreadSpawn { thread: String, message: String },

    #[error("Allocation failure: {0}")]
    Allocation(String),

    #[error("Image source failed: {0}")]
    Source(String),

    #[error("Sequence consistency violation: {0}")]
    Consistency(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline aborted")]
    Aborted,
}

impl PipelineError {
    /// Classification used in the error list and for the fatal/recoverable split.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::QueueClosedMisuse { .. } => ErrorKind::QueueClosedMisuse,
            PipelineError::Transform { .. } => ErrorKind::TransformFailure,
            PipelineError::Io { .. } => ErrorKind::IoFailure,
            PipelineError::ThreadSpawn { .. } => ErrorKind::ThreadSpawnFailure,
            PipelineError::Allocation(_) => ErrorKind::AllocationFailure,
            PipelineError::Source(_) => ErrorKind::SourceFailure,
            PipelineError::Consistency(_) => ErrorKind::ConsistencyViolation,
            PipelineError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PipelineError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Sequence number of the item this error concerns, if any.
    pub fn seq(&self) -> Option<SeqNo> {
        match self {
            PipelineError::Transform { seq, .. } | PipelineError::Io { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failure of a single transform invocation. Always per-item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("cannot allocate {width}x{height} output image")]
    Allocation { width: u64, height: u64 },

    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Kind of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QueueClosedMisuse,
    TransformFailure,
    IoFailure,
    ThreadSpawnFailure,
    AllocationFailure,
    SourceFailure,
    SequenceGap,
    ConsistencyViolation,
    InvalidConfig,
    Aborted,
}

impl ErrorKind {
    /// Fatal kinds abort the run; the rest drop one item and continue.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::QueueClosedMisuse
                | ErrorKind::ThreadSpawnFailure
                | ErrorKind::AllocationFailure
                | ErrorKind::ConsistencyViolation
                | ErrorKind::InvalidConfig
                | ErrorKind::Aborted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::QueueClosedMisuse => "queue closed misuse",
            ErrorKind::TransformFailure => "transform failure",
            ErrorKind::IoFailure => "io failure",
            ErrorKind::ThreadSpawnFailure => "thread spawn failure",
            ErrorKind::AllocationFailure => "allocation failure",
            ErrorKind::SourceFailure => "source failure",
            ErrorKind::SequenceGap => "sequence gap",
            ErrorKind::ConsistencyViolation => "consistency violation",
            ErrorKind::InvalidConfig => "invalid config",
            ErrorKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One entry of the run's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Item concerned, if the failure is tied to one.
    pub seq: Option<SeqNo>,
    /// Stage that observed the failure.
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, err: &PipelineError) -> Self {
        Self {
            seq: err.seq(),
            stage: stage.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn gap(stage: impl Into<String>, seq: SeqNo) -> Self {
        Self {
            seq: Some(seq),
            stage: stage.into(),
            kind: ErrorKind::SequenceGap,
            message: format!("{} never reached the sink", seq),
        }
    }

    /// Whether this record accounts for a missing output item.
    pub fn drops_item(&self) -> bool {
        self.seq.is_some()
            && matches!(
                self.kind,
                ErrorKind::TransformFailure | ErrorKind::IoFailure | ErrorKind::SequenceGap
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_carries_seq() {
        let err = PipelineError::Transform {
            stage: "flip".into(),
            seq: SeqNo(2),
            source: TransformError::Malformed("empty image".into()),
        };
        assert_eq!(err.seq(), Some(SeqNo(2)));
        assert_eq!(err.kind(), ErrorKind::TransformFailure);
        assert!(err.to_string().contains("#2"));

        let record = ErrorRecord::new("flip", &err);
        assert!(record.drops_item());
        assert!(!record.kind.is_fatal());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::ThreadSpawnFailure.is_fatal());
        assert!(ErrorKind::AllocationFailure.is_fatal());
        assert!(ErrorKind::QueueClosedMisuse.is_fatal());
        assert!(!ErrorKind::IoFailure.is_fatal());
        assert!(!ErrorKind::SourceFailure.is_fatal());
    }

    #[test]
    fn test_source_failure_drops_nothing() {
        let record = ErrorRecord::new("source", &PipelineError::Source("bad dir".into()));
        assert_eq!(record.seq, None);
        assert!(!record.drops_item());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ThreadSpawnFailure).unwrap();
        assert_eq!(json, "\"thread_spawn_failure\"");
    }
}
