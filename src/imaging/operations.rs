//! High-level image operations.
//!
//! These functions combine the geometry calculations with adapter execution.
//! They take a resolved plan, drive whichever adapter they were given, and
//! report what was written. Nothing here knows which engine is behind the
//! trait object.

use super::adapter::{AdapterError, RasterAdapter};
use super::params::FileType;
use std::path::{Path, PathBuf};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// A watermark to blend after geometry changes.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkJob {
    pub image: PathBuf,
    pub x: i64,
    pub y: i64,
    pub opacity: u8,
    pub tile: bool,
}

/// Operations applied to one source, in the order crop, rotate, resize,
/// watermark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationPlan {
    /// Edge trim as (top, left, right, bottom).
    pub crop: Option<(u32, u32, u32, u32)>,
    /// Counter-clockwise degrees; zero is skipped.
    pub rotate: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub watermark: Option<WatermarkJob>,
}

impl OperationPlan {
    pub fn resizes(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

/// What a plan produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_type: FileType,
}

/// Open `source`, apply `plan`, save to `destination` and release the image.
///
/// The adapter is destroyed even when a step fails, so it can be reused for
/// the next file.
pub fn run_operations(
    adapter: &mut dyn RasterAdapter,
    source: &Path,
    plan: &OperationPlan,
    destination: Option<&Path>,
    name: Option<&str>,
) -> Result<ProcessedImage> {
    adapter.open(source)?;
    let result = apply_and_save(adapter, plan, destination, name);
    adapter.destroy();
    result
}

fn apply_and_save(
    adapter: &mut dyn RasterAdapter,
    plan: &OperationPlan,
    destination: Option<&Path>,
    name: Option<&str>,
) -> Result<ProcessedImage> {
    if let Some((top, left, right, bottom)) = plan.crop {
        adapter.crop(top, left, right, bottom)?;
    }
    if let Some(angle) = plan.rotate.filter(|a| a % 360 != 0) {
        adapter.rotate(angle)?;
    }
    if plan.resizes() {
        adapter.resize(plan.width, plan.height)?;
    }
    if let Some(job) = &plan.watermark {
        adapter.watermark(&job.image, job.x, job.y, job.opacity, job.tile)?;
    }

    let (width, height) = adapter.dimensions().ok_or(AdapterError::NotProcessable)?;
    let file_type = adapter.file_type().ok_or(AdapterError::NotProcessable)?;
    let path = adapter.save(destination, name)?;

    Ok(ProcessedImage {
        path,
        width,
        height,
        file_type,
    })
}
