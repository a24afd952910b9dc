//! Shared test utilities for the assetgate test suite.
//!
//! Images are generated in-process rather than checked in as fixtures:
//! tests stay hermetic, and the gradient content compresses realistically
//! (a flat-color image would make every budget trivially satisfiable).

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Deterministic gradient PNG of the given dimensions.
///
/// The XOR term adds enough high-frequency detail that lossy encoders
/// produce meaningfully different sizes across quality levels.
pub(crate) fn synthetic_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x ^ y) & 0xff) as u8;
        Rgb([r, g, b])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}
