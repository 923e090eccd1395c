//! Watermark opacity and source-over blending, shared by every backend.
//!
//! Alpha is reported on two scales in this crate:
//!
//! | Scale | Opaque | Transparent | Used by |
//! |-------|--------|-------------|---------|
//! | 8-bit | 255 | 0 | pixel buffers |
//! | 0–127 | 0 | 127 | `color_at`, the opacity formula |

use image::{RgbaImage, imageops};

use super::calculations::{tile_offsets, watermark_placement};
use super::params::WatermarkPosition;

/// Convert 8-bit alpha (255 opaque) to the 0–127 scale (0 opaque).
pub fn alpha_to_127(alpha: u8) -> u8 {
    127 - ((alpha as u32 * 127 + 127) / 255) as u8
}

/// Convert 0–127 alpha (0 opaque) back to 8-bit alpha.
pub fn alpha_from_127(alpha: u8) -> u8 {
    let a = alpha.min(127) as u32;
    (255 - (a * 255 + 63) / 127) as u8
}

/// Scale one alpha value on the 0–127 scale.
///
/// `new = 127 + (opacity / 100) * (old - 127)`, clamped to `0..=127`.
/// Opacity 100 returns `old`; opacity 0 returns 127 (fully transparent).
pub fn opacity_alpha(old: u8, opacity: u8) -> u8 {
    let k = opacity.min(100) as f64 / 100.0;
    let old = old.min(127) as f64;
    (127.0 + k * (old - 127.0)).round().clamp(0.0, 127.0) as u8
}

/// Fade a watermark bitmap to `opacity` percent.
///
/// Each pixel's alpha goes through [`opacity_alpha`] on the 0–127 scale and
/// back, so the result is exactly what `color_at` reports for the formula.
pub fn apply_opacity(img: &mut RgbaImage, opacity: u8) {
    if opacity >= 100 {
        return;
    }
    for px in img.pixels_mut() {
        px[3] = alpha_from_127(opacity_alpha(alpha_to_127(px[3]), opacity));
    }
}

/// Blend `mark` onto `canvas` with its top-left corner at `(x, y)`.
/// Parts outside the canvas are clipped.
pub fn composite(canvas: &mut RgbaImage, mark: &RgbaImage, x: i64, y: i64) {
    imageops::overlay(canvas, mark, x, y);
}

/// Place a prepared watermark according to `position`.
///
/// Tiling (either requested or from the `Tile` policy) repeats the mark from
/// `requested` across the canvas; every other policy draws it once.
/// Returns the number of blend operations performed.
pub fn place_watermark(
    canvas: &mut RgbaImage,
    mark: &RgbaImage,
    position: Option<WatermarkPosition>,
    requested: (i64, i64),
    tile: bool,
) -> usize {
    let canvas_size = canvas.dimensions();
    let mark_size = mark.dimensions();

    if tile || position == Some(WatermarkPosition::Tile) {
        let offsets = tile_offsets(canvas_size, mark_size, requested);
        for &(x, y) in &offsets {
            composite(canvas, mark, x, y);
        }
        return offsets.len();
    }

    let (x, y) = watermark_placement(position, canvas_size, mark_size, requested);
    composite(canvas, mark, x, y);
    1
}
