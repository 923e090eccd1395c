//! Parameter types for adapter operations.
//!
//! These structs describe *what* an adapter should do, not *how*. They are
//! resolved from configuration once and handed to whichever backend is in
//! use, so every backend sees the same flags, quality and watermark layout.
//!
//! ## Types
//!
//! - [`Quality`]: Encoder quality (1–100) or unset. Zero means unset.
//! - [`GeometryFlags`]: keep-frame / constrain-only / keep-aspect-ratio / keep-transparency.
//! - [`FileType`]: The raster formats an adapter can open and save.
//! - [`WatermarkPosition`]: The seven layout policies for a watermark.
//! - [`WatermarkSettings`]: Configured watermark position, size and opacity.
//! - [`AdapterOptions`]: Everything above, bundled per adapter.
//! - [`RgbaColor`]: A single pixel as reported by `color_at`.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Encoder quality (1-100), or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality(Option<u8>);

impl Quality {
    /// Values above 100 are clamped; 0 means "let the encoder decide".
    pub fn new(value: u32) -> Self {
        match value {
            0 => Self(None),
            v => Self(Some(v.min(100) as u8)),
        }
    }

    pub fn unset() -> Self {
        Self(None)
    }

    pub fn value(self) -> Option<u8> {
        self.0
    }
}

/// Geometry policy flags consumed by `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometryFlags {
    /// Pad the output to the exact requested frame.
    pub keep_frame: bool,
    /// Never upscale past the source size.
    pub constrain_only: bool,
    /// Preserve the source aspect ratio inside the frame.
    pub keep_aspect_ratio: bool,
    /// Keep alpha on save and pad frames with transparency.
    pub keep_transparency: bool,
}

impl Default for GeometryFlags {
    fn default() -> Self {
        Self {
            keep_frame: false,
            constrain_only: true,
            keep_aspect_ratio: true,
            keep_transparency: true,
        }
    }
}

/// Raster formats the adapters read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl FileType {
    pub fn from_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }

    /// Guess from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        image::ImageFormat::from_path(path)
            .ok()
            .and_then(Self::from_format)
    }

    /// Whether saved files can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

/// Where a watermark goes on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    Stretch,
    Tile,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

/// Watermark layout configured on an adapter.
///
/// Unset fields fall back to the arguments passed to `watermark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatermarkSettings {
    pub position: Option<WatermarkPosition>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub opacity: Option<u8>,
}

impl WatermarkSettings {
    /// Explicit target size, when both dimensions are set and non-zero.
    pub fn size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Configured opacity wins over the call argument.
    pub fn effective_opacity(&self, requested: u8) -> u8 {
        self.opacity.filter(|&o| o > 0).unwrap_or(requested).min(100)
    }
}

/// Per-adapter settings resolved before any operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    pub flags: GeometryFlags,
    pub quality: Quality,
    /// Fill colour for frames, rotation corners and flattening.
    pub background: [u8; 3],
    pub watermark: WatermarkSettings,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            flags: GeometryFlags::default(),
            quality: Quality::unset(),
            background: [255, 255, 255],
            watermark: WatermarkSettings::default(),
        }
    }
}

impl AdapterOptions {
    /// Fill used for padding: transparent when transparency is kept.
    pub fn frame_fill(&self) -> image::Rgba<u8> {
        let [r, g, b] = self.background;
        let alpha = if self.flags.keep_transparency { 0 } else { 255 };
        image::Rgba([r, g, b, alpha])
    }
}

/// One pixel, with alpha on the 0 (opaque) to 127 (transparent) scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbaColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl From<image::Rgba<u8>> for RgbaColor {
    fn from(px: image::Rgba<u8>) -> Self {
        let [red, green, blue, a] = px.0;
        Self {
            red,
            green,
            blue,
            alpha: super::compositor::alpha_to_127(a),
        }
    }
}
