//! Shared test utilities for the rastermark test suite.
//!
//! Synthetic image writers, deterministic profile bytes, and pixel assertions
//! that panic with a readable message.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let photo = write_test_jpeg(tmp.path(), "photo.jpg", 200, 100);
//! let mark = write_test_png(tmp.path(), "mark.png", 50, 50, [255, 0, 0, 255]);
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbImage, RgbaImage};

// =========================================================================
// Synthetic files
// =========================================================================

/// Encode a gradient JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut out), 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// Encode a single-colour RGBA PNG.
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = Vec::new();
    PngEncoder::new(Cursor::new(&mut out))
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    out
}

/// Write [`jpeg_bytes`] to `dir/name` and return the path.
pub fn write_test_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, jpeg_bytes(width, height)).unwrap();
    path
}

/// Write [`png_bytes`] to `dir/name` and return the path.
pub fn write_test_png(dir: &Path, name: &str, width: u32, height: u32, rgba: [u8; 4]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(width, height, rgba)).unwrap();
    path
}

/// Deterministic, non-repeating-at-chunk-boundaries profile payload.
pub fn profile_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =========================================================================
// Pixel assertions
// =========================================================================

/// Assert a pixel is within `tolerance` of `expected` on every channel.
pub fn assert_pixel_near(img: &RgbaImage, x: u32, y: u32, expected: [u8; 4], tolerance: u8) {
    let actual = img.get_pixel(x, y).0;
    let close = actual
        .iter()
        .zip(expected.iter())
        .all(|(a, e)| a.abs_diff(*e) <= tolerance);
    assert!(
        close,
        "pixel ({x}, {y}) is {actual:?}, expected {expected:?} ±{tolerance}"
    );
}
