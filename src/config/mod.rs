//! Configuration module for imgpipe-rs
//!
//! A pipeline run is described by a [`PipelineConfig`]: the ordering
//! contract, queue capacities, an optional ingestion limit and the ordered
//! list of transform stages. Configurations are stored as TOML.
//!
//! # Example
//!
//! ```toml
//! ordering = "preserve"
//! source_capacity = 24
//!
//! [[stages]]
//! name = "upscale"
//! workers = 4
//! transform = { kind = "scale_up", factor = 3 }
//!
//! [[stages]]
//! name = "flip"
//! transform = { kind = "vertical_flip" }
//! ```

use crate::error::{ImgPipeError, Result};
use crate::imaging::filters::{scale_up, transform_fn, vertical_flip, TransformFn};
use crate::pipeline::stage::{
    default_workers, OrderingMode, TransformStage, DEFAULT_QUEUE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default upscale factor of the reference chain
pub const DEFAULT_SCALE_FACTOR: u32 = 3;

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_scale_factor() -> u32 {
    DEFAULT_SCALE_FACTOR
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::new(
            "upscale",
            TransformSpec::ScaleUp {
                factor: DEFAULT_SCALE_FACTOR,
            },
        ),
        StageConfig::new("flip", TransformSpec::VerticalFlip),
    ]
}

/// Which built-in transform a stage runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Nearest-neighbour upscale by an integer factor
    ScaleUp {
        #[serde(default = "default_scale_factor")]
        factor: u32,
    },
    /// Mirror top to bottom
    VerticalFlip,
}

impl TransformSpec {
    pub fn build(&self) -> TransformFn {
        match *self {
            TransformSpec::ScaleUp { factor } => transform_fn(move |img| scale_up(img, factor)),
            TransformSpec::VerticalFlip => transform_fn(vertical_flip),
        }
    }
}

/// One transform stage of the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub transform: TransformSpec,
    /// Worker threads; hardware parallelism when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Capacity of the queue this stage writes to
    #[serde(default = "default_capacity")]
    pub queue_capacity: usize,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, transform: TransformSpec) -> Self {
        Self {
            name: name.into(),
            transform,
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Worker count with the hardware default applied
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    pub fn to_transform_stage(&self) -> TransformStage {
        TransformStage::new(self.name.clone(), self.transform.build())
            .workers(self.resolved_workers())
            .queue_capacity(self.queue_capacity)
    }
}

/// Complete description of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ordering: OrderingMode,
    /// Capacity of the queue between the source and the first stage
    #[serde(default = "default_capacity")]
    pub source_capacity: usize,
    /// Stop ingesting after this many images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingMode::default(),
            source_capacity: DEFAULT_QUEUE_CAPACITY,
            limit: None,
            stages: default_stages(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImgPipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| e.with_context(format!("Invalid config file {:?}", path)))
    }

    /// Save the configuration as pretty TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| {
            ImgPipeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        tracing::info!("Saved pipeline config to {:?}", path);
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that could never run
    pub fn validate(&self) -> Result<()> {
        if self.source_capacity == 0 {
            return Err(ImgPipeError::Config(
                "source_capacity must be at least 1".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(ImgPipeError::Config("limit must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(ImgPipeError::Config("stage name is empty".to_string()));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(ImgPipeError::Config(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            if stage.workers == Some(0) {
                return Err(ImgPipeError::Config(format!(
                    "stage '{}' needs at least one worker",
                    stage.name
                )));
            }
            if stage.queue_capacity == 0 {
                return Err(ImgPipeError::Config(format!(
                    "stage '{}' queue_capacity must be at least 1",
                    stage.name
                )));
            }
            if let TransformSpec::ScaleUp { factor: 0 } = stage.transform {
                return Err(ImgPipeError::Config(format!(
                    "stage '{}' scale factor must be at least 1",
                    stage.name
                )));
            }
        }
        Ok(())
    }

    /// Apply the same worker count to every stage
    pub fn with_workers(mut self, workers: usize) -> Self {
        for stage in &mut self.stages {
            stage.workers = Some(workers);
        }
        self
    }

    /// Apply the same capacity to every queue
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.source_capacity = capacity;
        for stage in &mut self.stages {
            stage.queue_capacity = capacity;
        }
        self
    }
}
