//! Pure calculation functions for adapter geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Backends call them to decide sizes and offsets, then do the pixel work.

use std::path::{Path, PathBuf};

use super::adapter::AdapterError;
use super::params::{GeometryFlags, WatermarkPosition, WatermarkSettings};

/// Where a resized image lands inside its output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub dst_x: u32,
    pub dst_y: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl ResizePlan {
    /// True when the resized image does not fill the frame.
    pub fn needs_padding(&self) -> bool {
        self.dst_width != self.frame_width || self.dst_height != self.frame_height
    }
}

/// Resolve requested resize dimensions into destination and frame geometry.
///
/// # Arguments
/// * `source` - Current image dimensions (width, height)
/// * `width`, `height` - Requested frame size; at least one must be given
/// * `flags` - Geometry policy
///
/// # Returns
/// * [`ResizePlan`] with the scaled size and its offset in the frame
///
/// # Examples
/// ```
/// # use rastermark::imaging::{adapt_resize_values, GeometryFlags};
/// // Width only: height follows the source aspect ratio.
/// let plan = adapt_resize_values((200, 100), Some(100), None, GeometryFlags::default()).unwrap();
/// assert_eq!((plan.dst_width, plan.dst_height), (100, 50));
/// ```
pub fn adapt_resize_values(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    flags: GeometryFlags,
) -> Result<ResizePlan, AdapterError> {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return Err(AdapterError::InvalidDimensions(format!(
            "source image is {src_w}x{src_h}"
        )));
    }
    if width == Some(0) || height == Some(0) {
        return Err(AdapterError::InvalidDimensions(
            "resize dimensions must be positive".into(),
        ));
    }

    let ratio = src_w as f64 / src_h as f64;
    let (frame_w, frame_h) = match (width, height, flags.keep_frame) {
        (None, None, _) => {
            return Err(AdapterError::InvalidDimensions(
                "at least one of width or height is required".into(),
            ));
        }
        (Some(w), Some(h), _) => (w, h),
        (None, Some(h), false) => (round_dim(h as f64 * ratio), h),
        (Some(w), None, false) => (w, round_dim(w as f64 / ratio)),
        (None, Some(h), true) => (h, h),
        (Some(w), None, true) => (w, w),
    };

    let (dst_w, dst_h) = check_aspect_ratio(source, (frame_w, frame_h), flags);

    if !flags.keep_frame {
        return Ok(ResizePlan {
            dst_x: 0,
            dst_y: 0,
            dst_width: dst_w,
            dst_height: dst_h,
            frame_width: dst_w,
            frame_height: dst_h,
        });
    }

    Ok(ResizePlan {
        dst_x: centre_offset(frame_w, dst_w),
        dst_y: centre_offset(frame_h, dst_h),
        dst_width: dst_w,
        dst_height: dst_h,
        frame_width: frame_w,
        frame_height: frame_h,
    })
}

/// Fit the source into the frame according to the aspect-ratio flags.
fn check_aspect_ratio(source: (u32, u32), frame: (u32, u32), flags: GeometryFlags) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (frame_w, frame_h) = frame;
    if !flags.keep_aspect_ratio {
        return frame;
    }

    let (mut dst_w, mut dst_h) = frame;
    if flags.constrain_only && frame_w >= src_w && frame_h >= src_h {
        dst_w = src_w;
        dst_h = src_h;
    }

    let src_ratio = src_w as f64 / src_h as f64;
    let frame_ratio = frame_w as f64 / frame_h as f64;
    if src_ratio >= frame_ratio {
        dst_h = round_dim(dst_w as f64 / src_w as f64 * src_h as f64);
    } else {
        dst_w = round_dim(dst_h as f64 / src_h as f64 * src_w as f64);
    }
    (dst_w, dst_h)
}

fn round_dim(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

fn centre_offset(outer: u32, inner: u32) -> u32 {
    ((outer.saturating_sub(inner)) as f64 / 2.0).round() as u32
}

/// Bounding box of a `width` x `height` image rotated by `degrees`.
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let theta = degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let w = width as f64 * cos + height as f64 * sin;
    let h = width as f64 * sin + height as f64 * cos;
    // Trim float noise so 90° gives exactly h x w.
    let snap = |v: f64| ((v * 1e6).round() / 1e6).ceil().max(1.0) as u32;
    (snap(w), snap(h))
}

/// Output size of a crop, or `None` when the offsets consume the whole image.
pub fn crop_size(
    source: (u32, u32),
    top: u32,
    left: u32,
    right: u32,
    bottom: u32,
) -> Option<(u32, u32)> {
    let w = source.0.checked_sub(left)?.checked_sub(right)?;
    let h = source.1.checked_sub(top)?.checked_sub(bottom)?;
    (w > 0 && h > 0).then_some((w, h))
}

// ----------------------------------------------------------------------------
// Watermark layout
// ----------------------------------------------------------------------------

/// Top-left corner for a single (non-tiled) watermark.
///
/// `requested` is used as-is when no position policy is configured.
pub fn watermark_placement(
    position: Option<WatermarkPosition>,
    canvas: (u32, u32),
    mark: (u32, u32),
    requested: (i64, i64),
) -> (i64, i64) {
    let (cw, ch) = (canvas.0 as i64, canvas.1 as i64);
    let (mw, mh) = (mark.0 as i64, mark.1 as i64);
    let (x, y) = requested;
    match position {
        None | Some(WatermarkPosition::Tile) => (x, y),
        Some(WatermarkPosition::Stretch) | Some(WatermarkPosition::TopLeft) => (0, 0),
        Some(WatermarkPosition::TopRight) => (cw - mw, y),
        Some(WatermarkPosition::BottomLeft) => (x, ch - mh),
        Some(WatermarkPosition::BottomRight) => (cw - mw, ch - mh),
        Some(WatermarkPosition::Center) => ((cw - mw).div_euclid(2), (ch - mh).div_euclid(2)),
    }
}

/// Offsets at which a tiled watermark is drawn.
///
/// Starts at `start` and steps by the mark size in both axes while the
/// offset is still inside the canvas. Tiles wholly above or left of the
/// canvas are skipped.
///
/// ```
/// # use rastermark::imaging::tile_offsets;
/// assert_eq!(tile_offsets((120, 80), (50, 50), (0, 0)).len(), 6);
/// ```
pub fn tile_offsets(canvas: (u32, u32), mark: (u32, u32), start: (i64, i64)) -> Vec<(i64, i64)> {
    let (cw, ch) = (canvas.0 as i64, canvas.1 as i64);
    let (mw, mh) = (mark.0 as i64, mark.1 as i64);
    if mw == 0 || mh == 0 {
        return Vec::new();
    }

    let mut offsets = Vec::new();
    let mut y = start.1;
    while y < ch {
        if y + mh > 0 {
            let mut x = start.0;
            while x < cw {
                if x + mw > 0 {
                    offsets.push((x, y));
                }
                x += mw;
            }
        }
        y += mh;
    }
    offsets
}

// ----------------------------------------------------------------------------
// Watermark cache keys
// ----------------------------------------------------------------------------

/// How a backend derives the geometry part of a watermark cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryConvention {
    /// Suffix when an explicit size is configured or the policy is stretch;
    /// stretch uses the canvas size.
    ExplicitOrStretch,
    /// Resolve the size first (stretch → canvas, else configured) and
    /// suffix only when both resolved dimensions are non-zero.
    ResolvedNonZero,
}

/// Target geometry of the cached watermark bitmap, if any.
pub fn watermark_geometry(
    convention: GeometryConvention,
    settings: &WatermarkSettings,
    canvas: (u32, u32),
) -> Option<(u32, u32)> {
    let stretch = settings.position == Some(WatermarkPosition::Stretch);
    match convention {
        GeometryConvention::ExplicitOrStretch => {
            if stretch {
                Some(canvas)
            } else {
                settings.size()
            }
        }
        GeometryConvention::ResolvedNonZero => {
            let (w, h) = if stretch {
                canvas
            } else {
                (settings.width.unwrap_or(0), settings.height.unwrap_or(0))
            };
            (w > 0 && h > 0).then_some((w, h))
        }
    }
}

/// Derived on-disk path for a prepared watermark.
///
/// `dir/stem-tmp[-WxH][-O{opacity}].png`, the opacity part only below 100.
///
/// # Examples
/// ```
/// # use std::path::Path;
/// # use rastermark::imaging::watermark_cache_path;
/// let p = watermark_cache_path(Path::new("/wm/logo.png"), Some((40, 20)), 30);
/// assert_eq!(p, Path::new("/wm/logo-tmp-40x20-O30.png"));
/// ```
pub fn watermark_cache_path(image_path: &Path, geometry: Option<(u32, u32)>, opacity: u8) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = format!("{stem}-tmp");
    if let Some((w, h)) = geometry {
        name.push_str(&format!("-{w}x{h}"));
    }
    if opacity < 100 {
        name.push_str(&format!("-O{opacity}"));
    }
    name.push_str(".png");

    match image_path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}
