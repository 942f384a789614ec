pub mod orientation;
pub mod params;

use crate::config::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use std::io::Cursor;
use thiserror::Error;

pub use orientation::{apply_orientation, read_orientation, Orientation};
pub use params::{QueryParams, TranscodeOptions, TransformRequest};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// The raw-bytes-in, encoded-bytes-out image capability.
///
/// Implementations are CPU bound and synchronous; the pipeline runs them on
/// tokio's blocking pool.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, input: &[u8], options: &TranscodeOptions) -> Result<Vec<u8>, TransformError>;
}

/// [`Transcoder`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTranscoder;

impl Transcoder for ImageTranscoder {
    /// Orient, resize, encode.
    ///
    /// # Behavior
    /// - EXIF orientation is applied first so that width/height refer to the
    ///   upright image
    /// - Both dimensions: cover fit, the result is exactly `width` x `height`
    /// - One dimension: inside fit, the other side follows the aspect ratio
    /// - Neither: original size
    fn transcode(&self, input: &[u8], options: &TranscodeOptions) -> Result<Vec<u8>, TransformError> {
        let img = decode_image(input)?;
        let img = match read_orientation(input) {
            Some(o) => apply_orientation(img, o),
            None => img,
        };
        let img = resize_image(img, options.width, options.height);
        encode_image(&img, options.format, options.quality)
    }
}

/// Decodes raw image bytes, detecting the format from magic bytes.
///
/// Accepts JPEG, PNG, GIF (first frame), WebP, BMP and TIFF sources.
///
/// # Errors
/// Returns `TransformError::Decode` if the format is unknown or the data is
/// corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| TransformError::Decode(e.to_string()))
}

/// Resizes according to which target dimensions are present.
///
/// Uses Lanczos3 resampling. Both dimensions crop to fill (cover); a single
/// dimension scales proportionally (inside), enlarging when the source is
/// smaller. Computed sides are clamped to at least 1 pixel.
pub fn resize_image(img: DynamicImage, w: Option<u32>, h: Option<u32>) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();

    match (w, h) {
        (Some(w), Some(h)) => img.resize_to_fill(w, h, FilterType::Lanczos3),
        (Some(w), None) => {
            let target_h = scale_side(orig_h, w, orig_w);
            img.resize_exact(w, target_h, FilterType::Lanczos3)
        }
        (None, Some(h)) => {
            let target_w = scale_side(orig_w, h, orig_h);
            img.resize_exact(target_w, h, FilterType::Lanczos3)
        }
        (None, None) => img,
    }
}

// side * (target / reference), rounded, at least 1px
fn scale_side(side: u32, target: u32, reference: u32) -> u32 {
    let ratio = target as f64 / reference.max(1) as f64;
    ((side as f64 * ratio).round() as u32).max(1)
}

/// Encodes to the requested output format.
///
/// - **JPEG**: RGB, quality clamped to [1, 100]
/// - **PNG**: lossless; quality is ignored
pub fn encode_image(img: &DynamicImage, fmt: OutputFormat, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();

    match fmt {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
    }

    Ok(out)
}
