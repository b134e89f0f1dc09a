//! Error handling for imgpipe-rs
//!
//! This module defines the crate-level error type and a Result alias used
//! outside the pipeline hot path (configuration, image I/O, CLI plumbing).
//! Errors raised inside worker threads use [`crate::pipeline::PipelineError`].

use thiserror::Error;

/// Main error type for imgpipe-rs operations
#[derive(Error, Debug)]
pub enum ImgPipeError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the pipeline itself
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// Errors decoding or encoding images
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ImgPipeError>,
    },
}

impl ImgPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ImgPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for ImgPipeError {
    fn from(err: toml::de::Error) -> Self {
        ImgPipeError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ImgPipeError {
    fn from(err: toml::ser::Error) -> Self {
        ImgPipeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ImgPipeError {
    fn from(err: serde_json::Error) -> Self {
        ImgPipeError::Serialization(err.to_string())
    }
}

/// Result type alias for imgpipe-rs operations
pub type Result<T> = std::result::Result<T, ImgPipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ImgPipeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
