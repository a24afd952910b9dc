//! Deterministic compression ladder for web-optimized publishing.
//!
//! Given raw image bytes and a byte budget, [`compress`] produces the
//! smallest-acceptable lossy WebP re-encoding by trying a fixed sequence of
//! (downscale, quality) pairs. The sequence is the contract: identical input
//! bytes and identical budget always yield identical output bytes and
//! identical [`CompressionInfo`].
//!
//! Quality reduction is tried exhaustively before any resolution cut —
//! quality loss is visually subtler than resolution loss at the same
//! compression ratio — so the outer loop walks downscale factors and the
//! inner loop walks quality levels:
//!
//! ```text
//! for factor in [1.0, 0.9, 0.75, 0.6, 0.5]:
//!     for quality in [85, 75, 65, 55, 45, 35]:
//!         encode(factor, quality); first result <= budget wins
//! ```
//!
//! If no pair satisfies the budget the ladder fails — it never silently
//! exceeds it. Input that is already WebP and already under budget passes
//! through byte-for-byte (`compressed: false`).

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Downscale factors, tried in descending order. `1.0` first: full
/// resolution is kept whenever any quality level fits the budget.
pub const DOWNSCALE_FACTORS: [f64; 5] = [1.0, 0.9, 0.75, 0.6, 0.5];

/// Lossy quality levels, tried in descending order at each scale.
pub const QUALITY_LEVELS: [u8; 6] = [85, 75, 65, 55, 45, 35];

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("Failed to decode source image: {0}")]
    Decode(String),
    #[error(
        "image cannot be compressed below {max_bytes} bytes \
         (smallest achieved: {smallest} bytes, original: {original} bytes)"
    )]
    SizeLimitUnreachable {
        max_bytes: usize,
        smallest: usize,
        original: usize,
    },
}

/// What the ladder did to meet the budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionInfo {
    /// False only on the WebP pass-through path.
    pub compressed: bool,
    pub original_size: usize,
    pub final_size: usize,
    pub original_dimensions: (u32, u32),
    pub final_dimensions: (u32, u32),
    /// Chosen quality level; `None` on the pass-through path.
    pub quality: Option<u8>,
    pub downscaled: bool,
}

/// Re-encode `raw` as lossy WebP within `max_bytes`.
///
/// Decodes any format the crate's decoders support (PNG, JPEG, WebP),
/// flattens alpha onto a white background, then walks the ladder. Returns
/// the first encoding that fits, or [`CompressError::SizeLimitUnreachable`]
/// once every (scale, quality) pair has been tried.
pub fn compress(raw: &[u8], max_bytes: usize) -> Result<(Vec<u8>, CompressionInfo), CompressError> {
    let format = image::guess_format(raw).map_err(|e| CompressError::Decode(e.to_string()))?;
    let decoded = image::load_from_memory(raw).map_err(|e| CompressError::Decode(e.to_string()))?;
    let (width, height) = (decoded.width(), decoded.height());

    // Already the target format and already under budget: nothing to do.
    if format == ImageFormat::WebP && raw.len() <= max_bytes {
        let info = CompressionInfo {
            compressed: false,
            original_size: raw.len(),
            final_size: raw.len(),
            original_dimensions: (width, height),
            final_dimensions: (width, height),
            quality: None,
            downscaled: false,
        };
        return Ok((raw.to_vec(), info));
    }

    let base = flatten_to_rgb(&decoded);
    let mut smallest = usize::MAX;

    for factor in DOWNSCALE_FACTORS {
        let scaled = if factor < 1.0 {
            let new_w = ((width as f64 * factor) as u32).max(1);
            let new_h = ((height as f64 * factor) as u32).max(1);
            image::imageops::resize(&base, new_w, new_h, FilterType::Lanczos3)
        } else {
            base.clone()
        };
        let (sw, sh) = scaled.dimensions();

        for quality in QUALITY_LEVELS {
            let encoded = webp::Encoder::from_rgb(scaled.as_raw(), sw, sh).encode(quality as f32);
            smallest = smallest.min(encoded.len());
            if encoded.len() <= max_bytes {
                debug!(
                    original = raw.len(),
                    encoded = encoded.len(),
                    quality,
                    factor,
                    "compression ladder satisfied budget"
                );
                let info = CompressionInfo {
                    compressed: true,
                    original_size: raw.len(),
                    final_size: encoded.len(),
                    original_dimensions: (width, height),
                    final_dimensions: (sw, sh),
                    quality: Some(quality),
                    downscaled: factor < 1.0,
                };
                return Ok((encoded.to_vec(), info));
            }
        }
    }

    Err(CompressError::SizeLimitUnreachable {
        max_bytes,
        smallest,
        original: raw.len(),
    })
}

/// Composite the image onto a white background and drop alpha.
///
/// Lossy WebP output here is always opaque; transparent source pixels
/// blend toward white the same way every time, keeping the ladder
/// deterministic across alpha-carrying inputs.
fn flatten_to_rgb(img: &image::DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut rgb = RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u32;
        let blend = |c: u8| -> u8 { ((c as u32 * a + 255 * (255 - a)) / 255) as u8 };
        rgb.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    rgb
}
