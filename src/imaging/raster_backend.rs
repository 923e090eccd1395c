//! Software rasterizer backend, built on the `image` crate alone.
//!
//! This is the reference engine: other backends correct their rotation
//! direction to match it, and it is the only one that carries a JPEG's
//! embedded ICC profile through a processing round.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP) | `image::ImageReader` |
//! | ICC profile | [`crate::jpeg::icc`] extract on open, inject on save |
//! | Resize | `image::imageops::resize` with `Lanczos3`, padded into the frame |
//! | Rotate | `image::imageops::rotate*` for right angles, `imageproc` otherwise |
//! | Encode | [`encode`](super::encode) in memory, written in one call |

use std::path::{Path, PathBuf};

use super::adapter::{
    AdapterError, BackendKind, RasterAdapter, RasterHandle, decode_bytes, prepare_destination,
    write_output,
};
use super::calculations::{GeometryConvention, adapt_resize_values, watermark_geometry};
use super::compositor::place_watermark;
use super::params::{AdapterOptions, FileType};
use super::runtime::{SharedRuntime, lock};
use super::transform::{place_in_frame, resize_lanczos, rotate_counter_clockwise};
use super::watermark_cache::WatermarkRequest;
use crate::jpeg::{self, IccProfile};

/// `image`-crate backend with ICC preservation.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RasterBackend {
    runtime: SharedRuntime,
    options: AdapterOptions,
    handle: Option<RasterHandle>,
    /// Profile of the currently open JPEG, re-embedded on save.
    profile: Option<IccProfile>,
}

impl RasterBackend {
    pub fn new(runtime: SharedRuntime, options: AdapterOptions) -> Self {
        Self {
            runtime,
            options,
            handle: None,
            profile: None,
        }
    }

    /// ICC profile read from the open file, if it had one.
    pub fn icc_profile(&self) -> Option<&IccProfile> {
        self.profile.as_ref()
    }

    fn handle_mut(&mut self) -> Result<&mut RasterHandle, AdapterError> {
        self.handle.as_mut().ok_or(AdapterError::NotProcessable)
    }

    /// Encode the handle and put the profile back for JPEG output.
    fn encode_with_profile(&self, handle: &RasterHandle) -> Result<Vec<u8>, AdapterError> {
        let bytes = handle.encode(&self.options)?;
        let Some(profile) = self.profile.as_ref().filter(|_| handle.file_type == FileType::Jpeg) else {
            return Ok(bytes);
        };
        match jpeg::inject(&bytes, profile) {
            Ok(with_profile) => Ok(with_profile),
            Err(e) => {
                tracing::warn!(error = %e, "could not embed ICC profile, saving without it");
                Ok(bytes)
            }
        }
    }
}

impl RasterAdapter for RasterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Raster
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut AdapterOptions {
        &mut self.options
    }

    fn open(&mut self, path: &Path) -> Result<(), AdapterError> {
        let data = std::fs::read(path)?;
        let (image, file_type) = decode_bytes(&data, path)?;

        self.profile = match file_type {
            FileType::Jpeg => jpeg::extract(&data),
            _ => None,
        };
        if let Some(profile) = &self.profile {
            tracing::debug!(
                path = %path.display(),
                bytes = profile.len(),
                chunks = profile.chunk_count(),
                "read ICC profile"
            );
        }

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
        let resized = resize_lanczos(&handle.image, plan.dst_width, plan.dst_height);
        handle.replace(place_in_frame(resized, &plan, options.frame_fill()));
        Ok(())
    }

    fn rotate(&mut self, angle: i32) -> Result<(), AdapterError> {
        let fill = self.options.frame_fill();
        let handle = self.handle_mut()?;
        let rotated = rotate_counter_clockwise(&handle.image, angle as f64, fill);
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

        let request = WatermarkRequest {
            source: path,
            geometry: watermark_geometry(
                GeometryConvention::ExplicitOrStretch,
                &settings,
                handle.image.dimensions(),
            ),
            opacity: settings.effective_opacity(opacity),
        };
        let mark = lock(&runtime)
            .watermarks
            .get_or_build(&request, |img, w, h| Ok(resize_lanczos(img, w, h)))?;

        let blends = place_watermark(&mut handle.image, &mark, settings.position, (x, y), tile);
        tracing::debug!(watermark = %path.display(), blends, "applied watermark");
        Ok(())
    }

    fn save(&mut self, destination: Option<&Path>, name: Option<&str>) -> Result<PathBuf, AdapterError> {
        let handle = self.handle.as_ref().ok_or(AdapterError::NotProcessable)?;
        let target = prepare_destination(&handle.source, destination, name)?;
        let bytes = self.encode_with_profile(handle)?;
        write_output(&target, &bytes)?;
        Ok(target)
    }

    fn get_image(&self) -> Result<Vec<u8>, AdapterError> {
        let handle = self.handle.as_ref().ok_or(AdapterError::NotProcessable)?;
        self.encode_with_profile(handle)
    }

    fn destroy(&mut self) {
        self.handle = None;
        self.profile = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::{WatermarkPosition, WatermarkSettings};
    use crate::imaging::runtime::AdapterRuntime;
    use crate::test_helpers::{assert_pixel_near, jpeg_bytes, profile_bytes, write_test_jpeg, write_test_png};

    fn backend() -> RasterBackend {
        RasterBackend::new(AdapterRuntime::shared(), AdapterOptions::default())
    }

    fn jpeg_with_profile(dir: &Path, name: &str, w: u32, h: u32, profile: &IccProfile) -> PathBuf {
        let path = dir.join(name);
        let bytes = jpeg::inject(&jpeg_bytes(w, h), profile).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn operations_need_an_open_image() {
        let mut b = backend();
        assert!(matches!(b.resize(Some(10), None), Err(AdapterError::NotProcessable)));
        assert!(matches!(b.rotate(90), Err(AdapterError::NotProcessable)));
        assert!(matches!(b.save(None, None), Err(AdapterError::NotProcessable)));
        assert!(matches!(b.get_image(), Err(AdapterError::NotProcessable)));
        assert!(matches!(
            b.watermark(Path::new("wm.png"), 0, 0, 100, false),
            Err(AdapterError::NotProcessable)
        ));
        assert!(!b.crop(1, 1, 1, 1).unwrap());
    }

    #[test]
    fn open_garbage_is_unsupported_format() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(matches!(backend().open(&path), Err(AdapterError::UnsupportedFormat(_))));
    }

    #[test]
    fn open_missing_file_is_io() {
        assert!(matches!(
            backend().open(Path::new("/nonexistent/x.jpg")),
            Err(AdapterError::Io(_))
        ));
    }

    #[test]
    fn profile_survives_resize_and_save() {
        let tmp = tempfile::TempDir::new().unwrap();
        let profile = IccProfile::new(profile_bytes(150_000));
        let src = jpeg_with_profile(tmp.path(), "in.jpg", 200, 100, &profile);

        let mut b = backend();
        b.open(&src).unwrap();
        assert_eq!(b.icc_profile(), Some(&profile));
        b.resize(Some(100), Some(50)).unwrap();
        let out = b.save(Some(&tmp.path().join("out")), Some("in.jpg")).unwrap();

        let data = std::fs::read(&out).unwrap();
        assert_eq!(jpeg::extract(&data), Some(profile));
        assert_eq!(image::image_dimensions(&out).unwrap(), (100, 50));
    }

    #[test]
    fn get_image_carries_profile() {
        let tmp = tempfile::TempDir::new().unwrap();
        let profile = IccProfile::new(profile_bytes(500));
        let src = jpeg_with_profile(tmp.path(), "in.jpg", 20, 20, &profile);

        let mut b = backend();
        b.open(&src).unwrap();
        let blob = b.get_image().unwrap();
        assert_eq!(jpeg::extract(&blob), Some(profile));
    }

    #[test]
    fn jpeg_without_profile_saves_without_one() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_jpeg(tmp.path(), "plain.jpg", 30, 20);
        let mut b = backend();
        b.open(&src).unwrap();
        assert!(b.icc_profile().is_none());
        let blob = b.get_image().unwrap();
        assert!(jpeg::extract(&blob).is_none());
    }

    #[test]
    fn save_without_destination_overwrites_source() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_jpeg(tmp.path(), "a.jpg", 40, 40);
        let mut b = backend();
        b.open(&src).unwrap();
        b.resize(Some(10), Some(10)).unwrap();
        assert_eq!(b.save(None, None).unwrap(), src);
        assert_eq!(image::image_dimensions(&src).unwrap(), (10, 10));
    }

    #[test]
    fn rotate_is_counter_clockwise() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 4, 2, [255, 255, 255, 255]);
        let mut b = backend();
        b.open(&src).unwrap();
        b.handle.as_mut().unwrap().image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));

        b.rotate(90).unwrap();
        assert_eq!(b.dimensions(), Some((2, 4)));
        let red = b.color_at(0, 3).unwrap();
        assert_eq!((red.red, red.green, red.alpha), (255, 0, 0));
    }

    #[test]
    fn crop_zero_offsets_is_noop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 10, 10, [0, 0, 0, 255]);
        let mut b = backend();
        b.open(&src).unwrap();
        assert!(!b.crop(0, 0, 0, 0).unwrap());
        assert!(b.crop(1, 2, 3, 4).unwrap());
        assert_eq!(b.dimensions(), Some((5, 5)));
    }

    #[test]
    fn keep_frame_pads_with_background() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 40, 20, [0, 0, 255, 255]);
        let mut b = backend();
        b.options_mut().flags.keep_frame = true;
        b.options_mut().flags.keep_transparency = false;
        b.options_mut().background = [255, 0, 0];
        b.open(&src).unwrap();

        b.resize(Some(20), Some(20)).unwrap();
        assert_eq!(b.dimensions(), Some((20, 20)));
        let edge = b.color_at(10, 0).unwrap();
        assert_eq!((edge.red, edge.green, edge.blue, edge.alpha), (255, 0, 0, 0));
        let centre = b.color_at(10, 10).unwrap();
        assert_eq!((centre.red, centre.blue), (0, 255));
    }

    #[test]
    fn watermark_bottom_right_uses_cache() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 60, 40, [255, 255, 255, 255]);
        let wm = write_test_png(tmp.path(), "wm.png", 10, 10, [0, 0, 0, 255]);

        let runtime = AdapterRuntime::shared();
        let mut options = AdapterOptions::default();
        options.watermark = WatermarkSettings {
            position: Some(WatermarkPosition::BottomRight),
            ..Default::default()
        };

        for _ in 0..2 {
            let mut b = RasterBackend::new(runtime.clone(), options);
            b.open(&src).unwrap();
            b.watermark(&wm, 0, 0, 100, false).unwrap();
            let handle = b.handle().unwrap();
            assert_pixel_near(&handle.image, 55, 35, [0, 0, 0, 255], 0);
            assert_pixel_near(&handle.image, 5, 5, [255, 255, 255, 255], 0);
        }

        let stats = lock(&runtime).watermarks.stats();
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.memory_hits, 1);
        assert!(tmp.path().join("wm-tmp.png").is_file());
    }

    #[test]
    fn watermark_missing_asset() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 10, 10, [255, 255, 255, 255]);
        let mut b = backend();
        b.open(&src).unwrap();
        let err = b.watermark(&tmp.path().join("nope.png"), 0, 0, 50, false).unwrap_err();
        assert!(matches!(err, AdapterError::MissingWatermarkAsset(_)));
    }

    #[test]
    fn stretch_watermark_covers_canvas() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_png(tmp.path(), "a.png", 30, 20, [255, 255, 255, 255]);
        let wm = write_test_png(tmp.path(), "wm.png", 5, 5, [0, 255, 0, 255]);
        let mut b = backend();
        b.options_mut().watermark.position = Some(WatermarkPosition::Stretch);
        b.open(&src).unwrap();
        b.watermark(&wm, 0, 0, 100, false).unwrap();

        assert!(tmp.path().join("wm-tmp-30x20.png").is_file());
        assert_pixel_near(&b.handle().unwrap().image, 29, 19, [0, 255, 0, 255], 0);
    }

    #[test]
    fn destroy_releases_image() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = write_test_jpeg(tmp.path(), "a.jpg", 8, 8);
        let mut b = backend();
        b.open(&src).unwrap();
        assert!(b.can_process());
        b.destroy();
        assert!(!b.can_process());
        assert!(b.icc_profile().is_none());
    }
}
