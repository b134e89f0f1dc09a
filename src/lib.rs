//! # imgpipe-rs: bounded multi-stage image pipeline
//!
//! Streams a sequence of images through `Source -> Transform* -> Sink` where
//! each transform stage is a pool of OS threads and every stage boundary is a
//! bounded blocking queue. Output can be restored to ingestion order.
//!
//! ## Architecture
//!
//! - **Pipeline**: queues, stage workers, reorder buffer and the orchestrator
//! - **Imaging**: source/sink seams plus directory and in-memory collaborators
//! - **Config**: TOML pipeline descriptions
//! - **Progress**: crossbeam channel of [`pipeline::PipelineEvent`]s
//!
//! ## Example
//!
//! ```no_run
//! use imgpipe_rs::imaging::{filters, MemorySink, MemorySource};
//! use imgpipe_rs::pipeline::{Pipeline, TransformStage};
//!
//! let report = Pipeline::builder()
//!     .stage(TransformStage::new("upscale", filters::transform_fn(|img| filters::scale_up(img, 3))))
//!     .stage(TransformStage::new("flip", filters::transform_fn(filters::vertical_flip)))
//!     .build()
//!     .expect("valid pipeline")
//!     .run(MemorySource::synthetic(10, 8, 8), MemorySink::new());
//!
//! assert_eq!(report.status.exit_code(), 0);
//! ```

pub mod config;
pub mod error;
pub mod imaging;
pub mod pipeline;
pub mod types;

pub use config::{PipelineConfig, StageConfig, TransformSpec};
pub use error::{ImgPipeError, Result, ResultExt};
pub use pipeline::{OrderingMode, Pipeline, PipelineBuilder, RunReport, RunStatus};
pub use types::{Image, Item, SourceImage};
