//! `imageproc` backend.
//!
//! Resizes by compositing the Lanczos-scaled image over a fresh background
//! frame, rotates clockwise through `imageproc` (angles mirrored to match
//! the reference engine) and resamples stretched watermarks to the canvas at
//! placement time.
//!
//! Reopening the path that was decoded last reuses that decode from the
//! runtime, as long as the file is unchanged on disk.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};

use super::adapter::{
    AdapterError, BackendKind, RasterAdapter, RasterHandle, decode_file, prepare_destination,
    write_output,
};
use super::calculations::{GeometryConvention, adapt_resize_values, watermark_geometry};
use super::compositor::place_watermark;
use super::params::{AdapterOptions, WatermarkPosition};
use super::runtime::{SharedRuntime, lock};
use super::transform::{resize_lanczos, rotate_clockwise};
use super::watermark_cache::WatermarkRequest;

pub struct ImageprocBackend {
    runtime: SharedRuntime,
    options: AdapterOptions,
    handle: Option<RasterHandle>,
}

impl ImageprocBackend {
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

impl RasterAdapter for ImageprocBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Imageproc
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut AdapterOptions {
        &mut self.options
    }

    fn open(&mut self, path: &Path) -> Result<(), AdapterError> {
        let previous = lock(&self.runtime)
            .previous_open(path)
            .map(|p| (p.image.clone(), p.file_type));
        if let Some((image, file_type)) = previous {
            tracing::debug!(path = %path.display(), "reusing previous decode");
            self.handle = Some(RasterHandle::new(image, file_type, path.to_path_buf()));
            return Ok(());
        }

        // Decode without holding the runtime so other workers keep going.
        let (image, file_type) = decode_file(path)?;
        lock(&self.runtime).remember_open(path, &image, file_type);
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

        let scaled = resize_lanczos(&handle.image, plan.dst_width, plan.dst_height);
        let mut frame = image::RgbaImage::from_pixel(plan.frame_width, plan.frame_height, options.frame_fill());
        imageops::overlay(&mut frame, &scaled, plan.dst_x as i64, plan.dst_y as i64);
        handle.replace(frame);
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
        let settings = self.options.watermark;
        let runtime = self.runtime.clone();
        let handle = self.handle_mut()?;
        let canvas = handle.image.dimensions();

        let request = WatermarkRequest {
            source: path,
            geometry: watermark_geometry(GeometryConvention::ExplicitOrStretch, &settings, canvas),
            opacity: settings.effective_opacity(opacity),
        };
        let cached = lock(&runtime)
            .watermarks
            .get_or_build(&request, |img, w, h| Ok(resize_lanczos(img, w, h)))?;

        // A bitmap loaded from an earlier run may not match this canvas.
        let stretched;
        let mark = if settings.position == Some(WatermarkPosition::Stretch) && cached.dimensions() != canvas {
            stretched = imageops::resize(cached.as_ref(), canvas.0, canvas.1, FilterType::Nearest);
            &stretched
        } else {
            cached.as_ref()
        };

        let blends = place_watermark(&mut handle.image, mark, settings.position, (x, y), tile);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::runtime::AdapterRuntime;
    use crate::test_helpers::{write_test_jpeg, write_test_png};
    use image::Rgba;

    #[test]
    fn reopen_same_path_reuses_decode() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 12, 8, [1, 2, 3, 255]);
        let runtime = AdapterRuntime::shared();

        let mut first = ImageprocBackend::new(runtime.clone(), AdapterOptions::default());
        first.open(&src).unwrap();
        // Edits to one adapter's handle never leak into the remembered decode.
        first.handle.as_mut().unwrap().image.put_pixel(0, 0, Rgba([9, 9, 9, 255]));

        let mut second = ImageprocBackend::new(runtime.clone(), AdapterOptions::default());
        second.open(&src).unwrap();
        assert_eq!(second.dimensions(), Some((12, 8)));
        assert_eq!(second.color_at(0, 0).unwrap().red, 1);
        assert!(lock(&runtime).previous_open(&src).is_some());
    }

    #[test]
    fn reopen_after_overwrite_decodes_again() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_jpeg(tmp.path(), "a.jpg", 40, 40);
        let runtime = AdapterRuntime::shared();

        let mut a = ImageprocBackend::new(runtime.clone(), AdapterOptions::default());
        a.open(&src).unwrap();
        a.resize(Some(10), Some(10)).unwrap();
        a.save(None, None).unwrap();

        let mut b = ImageprocBackend::new(runtime, AdapterOptions::default());
        b.open(&src).unwrap();
        assert_eq!(b.dimensions(), Some((10, 10)));
    }

    #[test]
    fn concurrent_opens_share_one_runtime() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths: Vec<_> = (0..6)
            .map(|i| write_test_jpeg(tmp.path(), &format!("{i}.jpg"), 30 + i, 20))
            .collect();
        let runtime = AdapterRuntime::shared();

        std::thread::scope(|scope| {
            for (i, path) in paths.iter().enumerate() {
                let runtime = runtime.clone();
                scope.spawn(move || {
                    let mut b = ImageprocBackend::new(runtime, AdapterOptions::default());
                    b.open(path).unwrap();
                    assert_eq!(b.dimensions(), Some((30 + i as u32, 20)));
                });
            }
        });

        let runtime = lock(&runtime);
        assert_eq!(paths.iter().filter(|p| runtime.previous_open(p).is_some()).count(), 1);
    }

    #[test]
    fn failed_decode_keeps_previous_open() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = write_test_png(tmp.path(), "a.png", 4, 4, [0, 0, 0, 255]);
        let bad = tmp.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();
        let runtime = AdapterRuntime::shared();

        let mut b = ImageprocBackend::new(runtime.clone(), AdapterOptions::default());
        b.open(&good).unwrap();
        assert!(matches!(b.open(&bad), Err(AdapterError::UnsupportedFormat(_))));
        assert!(runtime.try_lock().is_ok());
        assert!(lock(&runtime).previous_open(&good).is_some());
    }

    #[test]
    fn resize_into_frame_composites_over_background() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 20, 40, [0, 0, 0, 255]);
        let mut b = ImageprocBackend::new(AdapterRuntime::shared(), AdapterOptions::default());
        b.options_mut().flags.keep_frame = true;
        b.options_mut().flags.keep_transparency = false;
        b.open(&src).unwrap();

        b.resize(Some(30), Some(30)).unwrap();
        assert_eq!(b.dimensions(), Some((30, 30)));
        let side = b.color_at(1, 15).unwrap();
        assert_eq!((side.red, side.green, side.blue), (255, 255, 255));
        let middle = b.color_at(15, 15).unwrap();
        assert_eq!(middle.red, 0);
    }

    #[test]
    fn rotate_180_flips_corners() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 3, 3, [255, 255, 255, 255]);
        let mut b = ImageprocBackend::new(AdapterRuntime::shared(), AdapterOptions::default());
        b.open(&src).unwrap();
        b.handle.as_mut().unwrap().image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        b.rotate(180).unwrap();
        assert_eq!(b.color_at(2, 2).unwrap().green, 0);
    }

    #[test]
    fn center_watermark() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 50, 50, [255, 255, 255, 255]);
        let wm = write_test_png(tmp.path(), "wm.png", 10, 10, [0, 0, 255, 255]);
        let mut b = ImageprocBackend::new(AdapterRuntime::shared(), AdapterOptions::default());
        b.options_mut().watermark.position = Some(WatermarkPosition::Center);
        b.open(&src).unwrap();
        b.watermark(&wm, 0, 0, 100, false).unwrap();

        let c = b.color_at(25, 25).unwrap();
        assert_eq!((c.red, c.blue), (0, 255));
        assert_eq!(b.color_at(5, 5).unwrap().red, 255);
    }
}
