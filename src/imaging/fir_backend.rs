//! SIMD resampling backend built on `fast_image_resize`.
//!
//! Resizes with a Lanczos3 convolution, then extends the canvas to the
//! frame. Its rotation primitive (`imageproc`) turns clockwise, so angles
//! are mirrored to match the reference engine. ICC profiles are not kept.

use std::path::{Path, PathBuf};

use fast_image_resize as fr;
use image::RgbaImage;

use super::adapter::{
    AdapterError, BackendKind, RasterAdapter, RasterHandle, decode_file, prepare_destination,
    write_output,
};
use super::calculations::{GeometryConvention, adapt_resize_values, watermark_geometry};
use super::compositor::place_watermark;
use super::params::AdapterOptions;
use super::runtime::{SharedRuntime, lock};
use super::transform::{place_in_frame, rotate_clockwise};
use super::watermark_cache::WatermarkRequest;

/// Lanczos3 resample through `fast_image_resize`.
pub fn fir_resize(img: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, AdapterError> {
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }
    let (src_w, src_h) = img.dimensions();
    let src = fr::images::Image::from_vec_u8(src_w, src_h, img.as_raw().clone(), fr::PixelType::U8x4)
        .map_err(|e| AdapterError::InvalidDimensions(format!("resize source {src_w}x{src_h}: {e}")))?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x4);

    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .map_err(|e| AdapterError::InvalidDimensions(format!("resize to {width}x{height}: {e}")))?;

    RgbaImage::from_raw(width, height, dst.into_vec())
        .ok_or_else(|| AdapterError::InvalidDimensions(format!("resize output is not {width}x{height}")))
}

pub struct FirBackend {
    runtime: SharedRuntime,
    options: AdapterOptions,
    handle: Option<RasterHandle>,
}

impl FirBackend {
    pub fn new(runtime: SharedRuntime, options: AdapterOptions) -> Self {
        Self {
            runtime,
            options,
            handle: None,
        }
    }

    fn handle_mut(&mut self) -> Result<&mut RasterHandle, AdapterError> {
        self.handle.as_mut().ok_or(AdapterError::NotProcessable)
    }
}

impl RasterAdapter for FirBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fir
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut AdapterOptions {
        &mut self.options
    }

    fn open(&mut self, path: &Path) -> Result<(), AdapterError> {
        let (image, file_type) = decode_file(path)?;
        self.handle = Some(RasterHandle::new(image, file_type, path.to_path_buf()));
        Ok(())
    }

    fn handle(&self) -> Option<&RasterHandle> {
        self.handle.as_ref()
    }

    fn resize(&mut self, width: Option<u32>, height: Option<u32>) -> Result<(), AdapterError> {
        let options = self.options;
        let handle = self.handle_mut()?;
        let plan = adapt_resize_values(handle.image.dimensions(), width, height, options.flags)?;
        let resized = fir_resize(&handle.image, plan.dst_width, plan.dst_height)?;
        handle.replace(place_in_frame(resized, &plan, options.frame_fill()));
        Ok(())
    }

    fn rotate(&mut self, angle: i32) -> Result<(), AdapterError> {
        let fill = self.options.frame_fill();
        let handle = self.handle_mut()?;
        let rotated = rotate_clockwise(&handle.image, 360.0 - angle as f64, fill);
        handle.replace(rotated);
        Ok(())
    }

    fn crop(&mut self, top: u32, left: u32, right: u32, bottom: u32) -> Result<bool, AdapterError> {
        if top == 0 && left == 0 && right == 0 && bottom == 0 {
            return Ok(false);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Ok(false);
        };
        handle.crop_edges(top, left, right, bottom)?;
        Ok(true)
    }

    fn watermark(
        &mut self,
        path: &Path,
        x: i64,
        y: i64,
        opacity: u8,
        tile: bool,
    ) -> Result<(), AdapterError> {
        // Checked before anything else, even a cached bitmap.
        if path.as_os_str().is_empty() || !path.exists() {
            return Err(AdapterError::MissingWatermarkAsset(path.to_path_buf()));
        }

        let settings = self.options.watermark;
        let runtime = self.runtime.clone();
        let handle = self.handle_mut()?;

        let request = WatermarkRequest {
            source: path,
            geometry: watermark_geometry(
                GeometryConvention::ResolvedNonZero,
                &settings,
                handle.image.dimensions(),
            ),
            opacity: settings.effective_opacity(opacity),
        };
        let mark = lock(&runtime).watermarks.get_or_build(&request, fir_resize)?;

        let blends = place_watermark(&mut handle.image, &mark, settings.position, (x, y), tile);
        tracing::debug!(watermark = %path.display(), blends, "applied watermark");
        Ok(())
    }

    fn save(&mut self, destination: Option<&Path>, name: Option<&str>) -> Result<PathBuf, AdapterError> {
        let handle = self.handle.as_ref().ok_or(AdapterError::NotProcessable)?;
        let target = prepare_destination(&handle.source, destination, name)?;
        let bytes = handle.encode(&self.options)?;
        write_output(&target, &bytes)?;
        Ok(target)
    }

    fn get_image(&self) -> Result<Vec<u8>, AdapterError> {
        let handle = self.handle.as_ref().ok_or(AdapterError::NotProcessable)?;
        handle.encode(&self.options)
    }

    fn destroy(&mut self) {
        self.handle = None;
    }
}
