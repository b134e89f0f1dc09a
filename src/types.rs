//! Core data types for imgpipe-rs
//!
//! # Main Types
//!
//! - [`Image`] - RGBA8 pixel buffer, the payload every stage works on
//! - [`SourceImage`] - what an enumerator hands out: a key and an image
//! - [`Item`] - a `SourceImage` stamped with its ingestion sequence number
//!
//! # Ownership
//!
//! An [`Item`] is owned by exactly one stage at a time. Queues move it, they
//! never clone it. A transform borrows the input image, allocates a fresh
//! output and the worker drops the input before pushing the output.

use crate::pipeline::id::SeqNo;

/// Pixel payload carried through the pipeline.
pub type Image = image::RgbaImage;

/// An image produced by an enumerator, before a sequence number is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    /// Identity used to name the persisted output (usually the file stem).
    pub key: String,
    pub image: Image,
}

impl SourceImage {
    pub fn new(key: impl Into<String>, image: Image) -> Self {
        Self {
            key: key.into(),
            image,
        }
    }
}

/// One unit of pipeline data.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub seq: SeqNo,
    pub key: String,
    pub image: Image,
}

impl Item {
    /// Stamp a source image with its sequence number.
    pub fn ingest(seq: SeqNo, source: SourceImage) -> Self {
        Self {
            seq,
            key: source.key,
            image: source.image,
        }
    }

    /// Replace the payload, keeping sequence number and key.
    ///
    /// This is the only way a stage produces its output item, so transforms
    /// cannot renumber or rename what they process.
    pub fn with_image(self, image: Image) -> Self {
        Self {
            seq: self.seq,
            key: self.key,
            image,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
