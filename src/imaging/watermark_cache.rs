//! Memoized watermark bitmaps.
//!
//! Preparing a watermark (decode, resample to the target geometry, fade to
//! the requested opacity) is done once per derived cache path and process.
//! The result is written next to the source as a PNG so a later process can
//! load it instead of rebuilding, and kept in memory behind an `Arc` so every
//! later request in this process gets the very same bitmap.
//!
//! ## Lookup order
//!
//! 1. in-memory map
//! 2. PNG at the derived path on disk, promoted into memory
//! 3. build from the source image, persist, insert
//!
//! Entries are never evicted. Two processes building the same key may both
//! write the file; the output depends only on the key, so the last write is
//! as good as the first.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;

use super::adapter::{AdapterError, write_output};
use super::calculations::watermark_cache_path;
use super::compositor::apply_opacity;
use super::encode::{EncodeOptions, encode};
use super::params::{FileType, Quality};

/// What a caller wants prepared.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkRequest<'a> {
    pub source: &'a Path,
    /// Target size, or `None` to keep the source size.
    pub geometry: Option<(u32, u32)>,
    pub opacity: u8,
}

impl WatermarkRequest<'_> {
    pub fn cache_path(&self) -> PathBuf {
        watermark_cache_path(self.source, self.geometry, self.opacity)
    }
}

/// Counters for how requests were served.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkCacheStats {
    pub memory_hits: u32,
    pub disk_loads: u32,
    pub builds: u32,
}

impl WatermarkCacheStats {
    pub fn total(&self) -> u32 {
        self.memory_hits + self.disk_loads + self.builds
    }
}

impl fmt::Display for WatermarkCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reused, {} loaded, {} built ({} total)",
            self.memory_hits,
            self.disk_loads,
            self.builds,
            self.total()
        )
    }
}

/// Process-lifetime map from derived cache path to prepared bitmap.
#[derive(Debug, Default)]
pub struct WatermarkCache {
    entries: HashMap<PathBuf, Arc<RgbaImage>>,
    stats: WatermarkCacheStats,
}

impl WatermarkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> WatermarkCacheStats {
        self.stats
    }

    /// Return the prepared bitmap for `request`, building it if needed.
    ///
    /// `resize` does the resampling so each backend can use its own filter.
    pub fn get_or_build<F>(&mut self, request: &WatermarkRequest<'_>, resize: F) -> Result<Arc<RgbaImage>, AdapterError>
    where
        F: FnOnce(&RgbaImage, u32, u32) -> Result<RgbaImage, AdapterError>,
    {
        let key = request.cache_path();

        if let Some(hit) = self.entries.get(&key) {
            self.stats.memory_hits += 1;
            tracing::debug!(path = %key.display(), "watermark reused from memory");
            return Ok(Arc::clone(hit));
        }

        if key.is_file() {
            match image::open(&key) {
                Ok(img) => {
                    self.stats.disk_loads += 1;
                    tracing::debug!(path = %key.display(), "watermark loaded from disk");
                    return Ok(self.insert(key, img.to_rgba8()));
                }
                Err(e) => {
                    tracing::debug!(path = %key.display(), error = %e, "cached watermark unreadable, rebuilding");
                }
            }
        }

        let built = build(request, resize)?;
        persist(&key, &built);
        self.stats.builds += 1;
        tracing::debug!(path = %key.display(), "watermark built");
        Ok(self.insert(key, built))
    }

    fn insert(&mut self, key: PathBuf, img: RgbaImage) -> Arc<RgbaImage> {
        let entry = Arc::new(img);
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }
}

fn build<F>(request: &WatermarkRequest<'_>, resize: F) -> Result<RgbaImage, AdapterError>
where
    F: FnOnce(&RgbaImage, u32, u32) -> Result<RgbaImage, AdapterError>,
{
    let source = request.source;
    if source.as_os_str().is_empty() || !source.exists() {
        return Err(AdapterError::MissingWatermarkAsset(source.to_path_buf()));
    }

    let mut mark = image::open(source)
        .map_err(|e| AdapterError::UnsupportedFormat(format!("watermark {}: {e}", source.display())))?
        .to_rgba8();

    if let Some((w, h)) = request.geometry
        && w > 0
        && h > 0
        && mark.dimensions() != (w, h)
    {
        mark = resize(&mark, w, h)?;
    }

    apply_opacity(&mut mark, request.opacity);
    Ok(mark)
}

/// Best effort: a cache file that cannot be written only costs a rebuild
/// in the next process.
fn persist(path: &Path, img: &RgbaImage) {
    let opts = EncodeOptions {
        quality: Quality::unset(),
        background: [255, 255, 255],
        keep_transparency: true,
    };
    let result = encode(img, FileType::Png, opts).and_then(|bytes| write_output(path, &bytes));
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "could not persist watermark");
    }
}
