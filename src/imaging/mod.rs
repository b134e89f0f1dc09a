//! Collaborators at the pipeline boundary
//!
//! The core pipeline only knows three seams:
//!
//! - [`ImageSource`] - sequential enumerator feeding the source stage
//! - [`ImageSink`] - persister called by the sink stage in release order
//! - [`filters::TransformFn`] - pure per-image transform run by worker pools
//!
//! Concrete implementations live in the submodules: directory-backed
//! ([`dir`]), in-memory ([`memory`]) and the reference filters ([`filters`]).

pub mod dir;
pub mod filters;
pub mod memory;

pub use dir::{DirSink, DirSource};
pub use filters::{scale_up, vertical_flip, TransformFn};
pub use memory::{MemorySink, MemorySource, SavedLog};

use crate::error::Result;
use crate::types::{Item, SourceImage};

/// Sequential, single-consumer image enumerator.
///
/// `Ok(None)` means end of input and is permanent: every later call must
/// return `Ok(None)` again.
pub trait ImageSource: Send {
    fn next_image(&mut self) -> Result<Option<SourceImage>>;
}

/// Image persister. Only ever called from the sink thread.
///
/// Saving the same key twice overwrites the first output.
pub trait ImageSink: Send {
    fn save(&mut self, item: &Item) -> std::io::Result<()>;
}

impl ImageSource for Box<dyn ImageSource> {
    fn next_image(&mut self) -> Result<Option<SourceImage>> {
        (**self).next_image()
    }
}

impl ImageSink for Box<dyn ImageSink> {
    fn save(&mut self, item: &Item) -> std::io::Result<()> {
        (**self).save(item)
    }
}
