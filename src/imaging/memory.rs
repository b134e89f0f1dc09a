//! In-memory source and sink.
//!
//! Used by the test suite, the benchmarks and the CLI's synthetic mode. The
//! sink records what it saved in a shared [`SavedLog`] so callers can inspect
//! output order after the pipeline has joined its threads.

use crate::error::{ImgPipeError, Result};
use crate::imaging::{ImageSink, ImageSource};
use crate::pipeline::id::SeqNo;
use crate::types::{Image, Item, SourceImage};
use image::Rgba;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Enumerator over a fixed list of images.
#[derive(Debug, Default)]
pub struct MemorySource {
    images: VecDeque<SourceImage>,
    /// Fail when this many images have been handed out.
    fail_after: Option<usize>,
    emitted: usize,
}

impl MemorySource {
    pub fn new(images: impl IntoIterator<Item = SourceImage>) -> Self {
        Self {
            images: images.into_iter().collect(),
            fail_after: None,
            emitted: 0,
        }
    }

    /// `count` distinct gradient images keyed `img-0000`, `img-0001`, …
    ///
    /// The red channel of pixel (0, 0) holds the image index, which lets
    /// tests recognise an item after it has been transformed.
    pub fn synthetic(count: usize, width: u32, height: u32) -> Self {
        Self::new((0..count).map(|i| {
            let image = Image::from_fn(width, height, |x, y| {
                if x == 0 && y == 0 {
                    Rgba([i as u8, 0, 0, 255])
                } else {
                    Rgba([(x * 7) as u8, (y * 13) as u8, i as u8, 255])
                }
            });
            SourceImage::new(format!("img-{:04}", i), image)
        }))
    }

    /// Report an enumerator error once `count` images have been emitted.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn remaining(&self) -> usize {
        self.images.len()
    }
}

impl ImageSource for MemorySource {
    fn next_image(&mut self) -> Result<Option<SourceImage>> {
        if self.fail_after == Some(self.emitted) {
            return Err(ImgPipeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("enumerator failed after {} images", self.emitted),
            )));
        }
        let next = self.images.pop_front();
        if next.is_some() {
            self.emitted += 1;
        }
        Ok(next)
    }
}

/// One persisted item as seen by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    pub seq: SeqNo,
    pub key: String,
    pub image: Image,
}

/// Shared record of everything a [`MemorySink`] saved, in save order.
#[derive(Debug, Clone, Default)]
pub struct SavedLog {
    inner: Arc<Mutex<Vec<SavedImage>>>,
}

impl SavedLog {
    pub fn snapshot(&self) -> Vec<SavedImage> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.snapshot().iter().map(|s| s.seq.value()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|s| s.key).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, saved: SavedImage) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(saved);
    }
}

/// Persister that keeps saved images in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    log: SavedLog,
    failing_keys: HashSet<String>,
    delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the saved-image log, valid after the sink moved to its thread.
    pub fn log(&self) -> SavedLog {
        self.log.clone()
    }

    /// Fail with an IO error whenever an item with `key` is saved.
    pub fn fail_on(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    /// Sleep this long in every `save`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ImageSink for MemorySink {
    fn save(&mut self, item: &Item) -> std::io::Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing_keys.contains(&item.key) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("refusing to save {}", item.key),
            ));
        }
        self.log.push(SavedImage {
            seq: item.seq,
            key: item.key.clone(),
            image: item.image.clone(),
        });
        Ok(())
    }
}
