//! Test data builders for creating pipelines and images

use imgpipe_rs::imaging::filters::{transform_fn, vertical_flip, TransformFn};
use imgpipe_rs::pipeline::{OrderingMode, Pipeline, Spawner, TransformError, TransformStage};
use imgpipe_rs::{Image, SourceImage};
use image::Rgba;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Identity transform that sleeps first
pub fn slow_identity(delay: Duration) -> TransformFn {
    transform_fn(move |img: &Image| {
        std::thread::sleep(delay);
        Ok(img.clone())
    })
}

/// Identity transform that fails for images whose marker pixel matches
///
/// Only meaningful in the first stage, before any transform moved pixel (0, 0).
pub fn failing_on_markers(markers: &[u8]) -> TransformFn {
    let markers: HashSet<u8> = markers.iter().copied().collect();
    transform_fn(move |img: &Image| {
        let marker = img.get_pixel(0, 0)[0];
        if markers.contains(&marker) {
            Err(TransformError::Malformed(format!("marker {}", marker)))
        } else {
            Ok(img.clone())
        }
    })
}

/// Identity transform whose delay depends on the marker pixel, so that
/// workers finish items out of order
pub fn jittered_identity() -> TransformFn {
    transform_fn(|img: &Image| {
        let marker = u64::from(img.get_pixel(0, 0)[0]);
        std::thread::sleep(Duration::from_millis((marker * 7) % 5));
        Ok(img.clone())
    })
}

/// Uniform image with a marker in pixel (0, 0)
pub fn marked_image(key: &str, marker: u8, size: u32) -> SourceImage {
    let image = Image::from_fn(size, size, |x, y| {
        if x == 0 && y == 0 {
            Rgba([marker, 0, 0, 255])
        } else {
            Rgba([10, 20, 30, 255])
        }
    });
    SourceImage::new(key, image)
}

/// Builder for test pipelines with explicit worker counts
pub struct PipelineFixture {
    stages: Vec<TransformStage>,
    ordering: OrderingMode,
    capacity: usize,
    spawner: Option<Arc<dyn Spawner>>,
}

impl PipelineFixture {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            ordering: OrderingMode::Preserve,
            capacity: 4,
            spawner: None,
        }
    }

    /// The reference chain shape with identity-safe flips
    pub fn two_flips(workers: usize) -> Self {
        Self::new()
            .stage("flip-a", transform_fn(vertical_flip), workers)
            .stage("flip-b", transform_fn(vertical_flip), workers)
    }

    pub fn stage(mut self, name: &str, transform: TransformFn, workers: usize) -> Self {
        self.stages
            .push(TransformStage::new(name, transform).workers(workers));
        self
    }

    pub fn ordering(mut self, ordering: OrderingMode) -> Self {
        self.ordering = ordering;
        self
    }

    /// Capacity of every queue
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn build(self) -> Pipeline {
        let capacity = self.capacity;
        let mut builder = Pipeline::builder()
            .ordering(self.ordering)
            .source_capacity(capacity);
        for stage in self.stages {
            builder = builder.stage(stage.queue_capacity(capacity));
        }
        if let Some(spawner) = self.spawner {
            builder = builder.spawner(spawner);
        }
        builder.build().expect("fixture pipeline is valid")
    }
}

impl Default for PipelineFixture {
    fn default() -> Self {
        Self::new()
    }
}
