//! Output bookkeeping for incremental runs.
//!
//! Two pieces live here:
//!
//! - [`ImageInfoCache`] remembers the pixel dimensions and format of files the
//!   batch runner has already written, so a rerun can skip both the size probe
//!   and the work itself when the output is still on disk and was made from
//!   the same source bytes.
//! - [`hash_params`] turns the resolved processing parameters into the
//!   directory name outputs are written under. Changing any parameter that
//!   affects pixels moves the output to a new directory.
//!
//! ## Cache keys
//!
//! Entries are keyed by `"IMG_INFO" + path`. The prefix keeps the namespace
//! separate from anything else a caller might store in the same manifest.
//!
//! Outputs also record `source_hash`, the SHA-256 of the source file
//! contents. Content-based rather than mtime-based, so an edited source is
//! reprocessed even when its name and output path stay the same.
//!
//! ## Storage
//!
//! The manifest is a JSON file at `<output_dir>/.image-info.json`. A missing,
//! unreadable or wrong-version manifest loads as empty.

use crate::imaging::{AdapterOptions, BackendKind, FileType, OperationPlan};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the manifest file within the output directory.
const MANIFEST_FILENAME: &str = ".image-info.json";

/// Bump to invalidate every existing manifest.
const MANIFEST_VERSION: u32 = 2;

const KEY_PREFIX: &str = "IMG_INFO";

/// What is known about one written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: Option<FileType>,
    /// Hash of the source this output was made from; `None` for probed files.
    #[serde(default)]
    pub source_hash: Option<String>,
}

/// On-disk map from file path to [`ImageInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfoCache {
    pub version: u32,
    entries: HashMap<String, ImageInfo>,
    #[serde(skip)]
    stats: CacheStats,
}

impl Default for ImageInfoCache {
    fn default() -> Self {
        Self::empty()
    }
}

impl ImageInfoCache {
    /// Create an empty manifest (first run or `--no-cache`).
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Load from the output directory. Returns an empty manifest if the
    /// file doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(output_dir: &Path) -> Self {
        let path = manifest_path(output_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable image-info manifest");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest
    }

    /// Save to the output directory.
    pub fn save(&self, output_dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(output_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(manifest_path(output_dir), json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Cached info for `path`, only while the file still exists.
    pub fn get(&self, path: &Path) -> Option<ImageInfo> {
        let info = self.entries.get(&cache_key(path)).cloned()?;
        path.exists().then_some(info)
    }

    /// [`get`](Self::get), counted as a hit when found.
    pub fn lookup(&mut self, path: &Path) -> Option<ImageInfo> {
        let info = self.get(path)?;
        self.stats.hit();
        Some(info)
    }

    /// Cached info for an output, only if it was made from `source_hash`.
    /// Counted as a hit when found.
    pub fn lookup_output(&mut self, path: &Path, source_hash: &str) -> Option<ImageInfo> {
        let info = self
            .get(path)
            .filter(|info| info.source_hash.as_deref() == Some(source_hash))?;
        self.stats.hit();
        Some(info)
    }

    pub fn insert(&mut self, path: &Path, info: ImageInfo) {
        self.entries.insert(cache_key(path), info);
    }

    /// Cached info, or read the file header and remember the answer.
    pub fn get_or_probe(&mut self, path: &Path) -> image::ImageResult<ImageInfo> {
        if let Some(info) = self.lookup(path) {
            return Ok(info);
        }
        let (width, height) = image::image_dimensions(path)?;
        let info = ImageInfo {
            width,
            height,
            format: FileType::from_path(path),
            source_hash: None,
        };
        self.stats.probe();
        self.insert(path, info.clone());
        Ok(info)
    }
}

fn cache_key(path: &Path) -> String {
    format!("{KEY_PREFIX}{}", path.display())
}

/// Resolve the manifest path for an output directory.
pub fn manifest_path(output_dir: &Path) -> PathBuf {
    output_dir.join(MANIFEST_FILENAME)
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// SHA-256 over everything that changes output pixels, as a hex string.
///
/// Watermark settings only count when a watermark is actually applied, so
/// editing an unused `[watermark]` section does not move outputs.
pub fn hash_params(backend: BackendKind, options: &AdapterOptions, plan: &OperationPlan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"rastermark\0");
    hasher.update(backend.as_str().as_bytes());
    hasher.update(b"\0");

    let flags = options.flags;
    hasher.update([
        flags.keep_frame as u8,
        flags.constrain_only as u8,
        flags.keep_aspect_ratio as u8,
        flags.keep_transparency as u8,
    ]);
    hasher.update(options.quality.value().unwrap_or(0).to_le_bytes());
    hasher.update(options.background);

    update_opt(&mut hasher, plan.width);
    update_opt(&mut hasher, plan.height);
    hasher.update(plan.rotate.unwrap_or(0).rem_euclid(360).to_le_bytes());
    match plan.crop {
        Some((top, left, right, bottom)) => {
            hasher.update(b"\x01");
            for edge in [top, left, right, bottom] {
                hasher.update(edge.to_le_bytes());
            }
        }
        None => hasher.update(b"\x00"),
    }

    match &plan.watermark {
        Some(job) => {
            let settings = options.watermark;
            hasher.update(b"\x01");
            hasher.update(job.image.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(job.x.to_le_bytes());
            hasher.update(job.y.to_le_bytes());
            hasher.update([settings.effective_opacity(job.opacity), job.tile as u8]);
            hasher.update(format!("{:?}", settings.position).as_bytes());
            update_opt(&mut hasher, settings.width);
            update_opt(&mut hasher, settings.height);
        }
        None => hasher.update(b"\x00"),
    }

    format!("{:x}", hasher.finalize())
}

fn update_opt(hasher: &mut Sha256, value: Option<u32>) {
    match value {
        Some(v) => {
            hasher.update(b"\x01");
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update(b"\x00"),
    }
}

/// Summary of manifest use for a run.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u32,
    pub probes: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn probe(&mut self) {
        self.probes += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.probes
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(f, "{} cached, {} probed ({} total)", self.hits, self.probes, self.total())
        } else {
            write!(f, "{} probed", self.probes)
        }
    }
}
