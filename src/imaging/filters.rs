//! Reference image transforms.
//!
//! Both filters are pure: they borrow the input and return a newly allocated
//! image, so running them twice on equal inputs gives bit-identical outputs.

use crate::pipeline::error::TransformError;
use crate::types::Image;
use std::sync::Arc;

/// A stage's transform. Shared by all workers of the stage.
pub type TransformFn = Arc<dyn Fn(&Image) -> Result<Image, TransformError> + Send + Sync>;

/// Largest width or height an output image may have.
pub const MAX_DIMENSION: u64 = 1 << 16;

/// Wrap a function or closure as a [`TransformFn`].
pub fn transform_fn<F>(f: F) -> TransformFn
where
    F: Fn(&Image) -> Result<Image, TransformError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Nearest-neighbour upscale: every pixel becomes a `factor`×`factor` block.
pub fn scale_up(image: &Image, factor: u32) -> Result<Image, TransformError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(TransformError::Malformed(format!(
            "cannot scale an empty {}x{} image",
            width, height
        )));
    }
    if factor == 0 {
        return Err(TransformError::Malformed("scale factor is zero".to_string()));
    }

    let out_w = u64::from(width) * u64::from(factor);
    let out_h = u64::from(height) * u64::from(factor);
    if out_w > MAX_DIMENSION || out_h > MAX_DIMENSION {
        return Err(TransformError::Allocation {
            width: out_w,
            height: out_h,
        });
    }

    let len = (out_w * out_h * 4) as usize;
    let mut raw: Vec<u8> = Vec::new();
    raw.try_reserve_exact(len)
        .map_err(|_| TransformError::Allocation {
            width: out_w,
            height: out_h,
        })?;

    let src = image.as_raw();
    let row_bytes = width as usize * 4;
    for y in 0..height as usize {
        let row = &src[y * row_bytes..(y + 1) * row_bytes];
        let start = raw.len();
        for px in row.chunks_exact(4) {
            for _ in 0..factor {
                raw.extend_from_slice(px);
            }
        }
        let scaled_row = raw.len() - start;
        for _ in 1..factor {
            raw.extend_from_within(start..start + scaled_row);
        }
    }

    Image::from_raw(out_w as u32, out_h as u32, raw).ok_or(TransformError::Allocation {
        width: out_w,
        height: out_h,
    })
}

/// Mirror the image top to bottom.
pub fn vertical_flip(image: &Image) -> Result<Image, TransformError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(TransformError::Malformed(format!(
            "cannot flip an empty {}x{} image",
            width, height
        )));
    }
    Ok(image::imageops::flip_vertical(image))
}
