//! Directory-backed enumerator and persister.
//!
//! [`DirSource`] lists the image files of a directory once, sorts them by
//! file name and decodes them lazily, one per `next_image` call.
//! [`DirSink`] writes each item as `<key>.png` into an output directory.

use crate::error::{ImgPipeError, Result, ResultExt};
use crate::imaging::{ImageSink, ImageSource};
use crate::types::{Item, SourceImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// File extensions recognised as input images
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp"];

/// Enumerates and decodes the images of one directory.
#[derive(Debug)]
pub struct DirSource {
    root: PathBuf,
    pending: VecDeque<PathBuf>,
}

impl DirSource {
    /// List the images in `dir`. Subdirectories are not visited.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&root)
            .with_context(|| format!("Failed to read input directory {}", root.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();

        tracing::debug!("Found {} images in {}", files.len(), root.display());

        Ok(Self {
            root,
            pending: files.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl ImageSource for DirSource {
    fn next_image(&mut self) -> Result<Option<SourceImage>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };

        let image = image::open(&path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgba8();

        Ok(Some(SourceImage::new(key_for(&path), image)))
    }
}

/// Writes items as PNG files named after their key.
#[derive(Debug)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    /// Create the output directory if needed.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            ImgPipeError::Io(e).with_context(format!(
                "Failed to create output directory {}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.png", key))
    }
}

impl ImageSink for DirSink {
    fn save(&mut self, item: &Item) -> std::io::Result<()> {
        let path = self.path_for(&item.key);
        item.image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| match e {
                image::ImageError::IoError(io) => io,
                other => std::io::Error::other(other),
            })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn key_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
