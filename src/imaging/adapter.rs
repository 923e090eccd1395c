//! Raster adapter trait and shared types.
//!
//! The [`RasterAdapter`] trait is the capability set every backend provides:
//! open, resize, rotate, crop, watermark, save, get_image, color_at and
//! destroy. Callers pick a backend once with [`create_adapter`] and never
//! look at which engine they got.
//!
//! ## Backends
//!
//! | Kind | Resampling | Rotation | ICC profile | Reopen shortcut |
//! |------|-----------|----------|-------------|-----------------|
//! | `raster` | `image` Lanczos3 | counter-clockwise native | preserved | no |
//! | `fir` | `fast_image_resize` Lanczos3 | `imageproc`, clockwise | dropped | no |
//! | `imageproc` | `image` Lanczos3, composited | `imageproc`, clockwise | dropped | yes |
//!
//! Pixel state lives in a [`RasterHandle`], an owned RGBA buffer that
//! operations replace rather than mutate through aliases. Process-wide state
//! (watermark bitmaps, the last decoded file) is held by the
//! [`AdapterRuntime`](super::runtime::AdapterRuntime) passed in at creation.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::calculations::crop_size;
use super::encode::{EncodeOptions, encode};
use super::params::{AdapterOptions, FileType, RgbaColor};
use super::runtime::SharedRuntime;
use super::transform::crop_window;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Image is not processable: no image is open")]
    NotProcessable,
    #[error("Watermark image absent: {}", .0.display())]
    MissingWatermarkAsset(PathBuf),
    #[error("Unable to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which engine backs an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Software rasterizer; the only backend that keeps ICC profiles.
    #[default]
    Raster,
    /// SIMD resampling through `fast_image_resize`.
    Fir,
    /// `imageproc` geometry with same-path reopen caching.
    Imageproc,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::Fir => "fir",
            Self::Imageproc => "imageproc",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raster" | "gd" => Ok(Self::Raster),
            "fir" | "fast" => Ok(Self::Fir),
            "imageproc" => Ok(Self::Imageproc),
            other => Err(format!(
                "unknown backend '{other}' (expected raster, fir or imageproc)"
            )),
        }
    }
}

/// Adapter capability set.
///
/// Every geometry and watermark operation fails with
/// [`AdapterError::NotProcessable`] until [`open`](Self::open) succeeds.
pub trait RasterAdapter: Send {
    fn kind(&self) -> BackendKind;

    fn options(&self) -> &AdapterOptions;

    fn options_mut(&mut self) -> &mut AdapterOptions;

    /// Decode `path` and make it the current image.
    fn open(&mut self, path: &Path) -> Result<(), AdapterError>;

    /// The current image, if one is open.
    fn handle(&self) -> Option<&RasterHandle>;

    /// Resize to the frame derived from `width`/`height` and the geometry flags.
    fn resize(&mut self, width: Option<u32>, height: Option<u32>) -> Result<(), AdapterError>;

    /// Rotate counter-clockwise by `angle` degrees around the centre.
    fn rotate(&mut self, angle: i32) -> Result<(), AdapterError>;

    /// Trim the given number of pixels from each edge.
    ///
    /// Returns `Ok(false)` without doing anything when all offsets are zero
    /// or no image is open.
    fn crop(&mut self, top: u32, left: u32, right: u32, bottom: u32) -> Result<bool, AdapterError>;

    /// Blend the watermark at `path` onto the current image.
    fn watermark(
        &mut self,
        path: &Path,
        x: i64,
        y: i64,
        opacity: u8,
        tile: bool,
    ) -> Result<(), AdapterError>;

    /// Encode and write the current image; returns the written path.
    fn save(&mut self, destination: Option<&Path>, name: Option<&str>) -> Result<PathBuf, AdapterError>;

    /// Encoded bytes of the current image in its own format.
    fn get_image(&self) -> Result<Vec<u8>, AdapterError>;

    /// Release the current image.
    fn destroy(&mut self);

    fn can_process(&self) -> bool {
        self.handle().is_some()
    }

    /// Current (width, height).
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.handle().map(|h| h.image.dimensions())
    }

    fn file_type(&self) -> Option<FileType> {
        self.handle().map(|h| h.file_type)
    }

    /// One pixel, alpha on the 0–127 scale.
    fn color_at(&self, x: u32, y: u32) -> Result<RgbaColor, AdapterError> {
        let handle = self.handle().ok_or(AdapterError::NotProcessable)?;
        handle
            .image
            .get_pixel_checked(x, y)
            .map(|px| RgbaColor::from(*px))
            .ok_or_else(|| {
                let (w, h) = handle.image.dimensions();
                AdapterError::InvalidDimensions(format!("pixel ({x}, {y}) outside {w}x{h}"))
            })
    }
}

/// A decoded image owned by one adapter.
#[derive(Debug, Clone)]
pub struct RasterHandle {
    pub image: RgbaImage,
    pub file_type: FileType,
    /// File the image was opened from; the default save target.
    pub source: PathBuf,
}

impl RasterHandle {
    pub fn new(image: RgbaImage, file_type: FileType, source: PathBuf) -> Self {
        Self {
            image,
            file_type,
            source,
        }
    }

    /// Replace the pixel buffer.
    pub fn replace(&mut self, image: RgbaImage) {
        self.image = image;
    }

    /// Edge crop shared by every backend.
    pub fn crop_edges(&mut self, top: u32, left: u32, right: u32, bottom: u32) -> Result<(), AdapterError> {
        let (w, h) = self.image.dimensions();
        let (nw, nh) = crop_size((w, h), top, left, right, bottom).ok_or_else(|| {
            AdapterError::InvalidDimensions(format!(
                "crop {top}/{left}/{right}/{bottom} leaves nothing of {w}x{h}"
            ))
        })?;
        let cropped = crop_window(&self.image, left, top, nw, nh);
        self.replace(cropped);
        Ok(())
    }

    /// Encode in the handle's own format with the adapter's settings.
    pub fn encode(&self, options: &AdapterOptions) -> Result<Vec<u8>, AdapterError> {
        encode(
            &self.image,
            self.file_type,
            EncodeOptions {
                quality: options.quality,
                background: options.background,
                keep_transparency: options.flags.keep_transparency,
            },
        )
    }
}

/// Extensions whose decoders are compiled in.
const CANDIDATES: &[(&str, image::ImageFormat)] = &[
    ("jpg", image::ImageFormat::Jpeg),
    ("jpeg", image::ImageFormat::Jpeg),
    ("png", image::ImageFormat::Png),
    ("gif", image::ImageFormat::Gif),
    ("webp", image::ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// File extensions every backend can open.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Decode a supported raster file.
pub fn decode_file(path: &Path) -> Result<(RgbaImage, FileType), AdapterError> {
    let data = std::fs::read(path)?;
    decode_bytes(&data, path)
}

/// Decode an in-memory raster; `label` only names it in errors.
pub fn decode_bytes(data: &[u8], label: &Path) -> Result<(RgbaImage, FileType), AdapterError> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(AdapterError::Io)?;
    let file_type = reader
        .format()
        .and_then(FileType::from_format)
        .ok_or_else(|| AdapterError::UnsupportedFormat(format!("{}", label.display())))?;
    let img = reader
        .decode()
        .map_err(|e| AdapterError::UnsupportedFormat(format!("{}: {e}", label.display())))?;
    Ok((img.to_rgba8(), file_type))
}

/// Resolve where `save` writes and make sure its directory exists.
///
/// - no destination: overwrite the source
/// - destination only: treated as the full file path
/// - destination and name: `destination/name`
pub fn prepare_destination(
    source: &Path,
    destination: Option<&Path>,
    name: Option<&str>,
) -> Result<PathBuf, AdapterError> {
    let target = match (destination, name) {
        (None, _) => source.to_path_buf(),
        (Some(dest), None) => dest.to_path_buf(),
        (Some(dest), Some(name)) => dest.join(name),
    };
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| AdapterError::WriteFailure {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(target)
}

/// Write a fully encoded buffer in one call.
pub fn write_output(path: &Path, bytes: &[u8]) -> Result<(), AdapterError> {
    std::fs::write(path, bytes).map_err(|source| AdapterError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "saved image");
    Ok(())
}

/// Build an adapter for `kind` bound to `runtime`.
pub fn create_adapter(
    kind: BackendKind,
    runtime: SharedRuntime,
    options: AdapterOptions,
) -> Box<dyn RasterAdapter> {
    match kind {
        BackendKind::Raster => Box::new(super::raster_backend::RasterBackend::new(runtime, options)),
        BackendKind::Fir => Box::new(super::fir_backend::FirBackend::new(runtime, options)),
        BackendKind::Imageproc => {
            Box::new(super::imageproc_backend::ImageprocBackend::new(runtime, options))
        }
    }
}
