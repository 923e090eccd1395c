//! Process-wide adapter state.
//!
//! Adapters do not keep statics. Everything that outlives a single adapter,
//! the watermark bitmaps and the last decoded file, lives in an
//! [`AdapterRuntime`] that callers create once and hand to every adapter.
//! Tests build a fresh runtime each time.
//!
//! The runtime sits behind a `Mutex` so a batch can share it across rayon
//! workers. Holding the lock covers both the in-memory map and the on-disk
//! check-then-write of a watermark build.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use image::RgbaImage;

use super::params::FileType;
use super::watermark_cache::WatermarkCache;

pub type SharedRuntime = Arc<Mutex<AdapterRuntime>>;

/// The most recent decode, kept for the same-path reopen shortcut.
#[derive(Debug, Clone)]
pub struct PreviousOpen {
    pub path: PathBuf,
    pub image: RgbaImage,
    pub file_type: FileType,
    stamp: Option<FileStamp>,
}

/// Size and mtime of a file when it was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Default)]
pub struct AdapterRuntime {
    pub watermarks: WatermarkCache,
    previous_open: Option<PreviousOpen>,
}

impl AdapterRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh runtime ready to share between adapters.
    pub fn shared() -> SharedRuntime {
        Arc::new(Mutex::new(Self::new()))
    }

    /// The previous decode, if it was of `path` and the file has not
    /// changed on disk since.
    pub fn previous_open(&self, path: &Path) -> Option<&PreviousOpen> {
        self.previous_open
            .as_ref()
            .filter(|p| p.path == path && p.stamp.is_some() && p.stamp == FileStamp::read(path))
    }

    pub fn remember_open(&mut self, path: &Path, image: &RgbaImage, file_type: FileType) {
        self.previous_open = Some(PreviousOpen {
            path: path.to_path_buf(),
            image: image.clone(),
            file_type,
            stamp: FileStamp::read(path),
        });
    }
}

/// Lock the runtime, recovering the state if another holder panicked.
pub fn lock(runtime: &SharedRuntime) -> MutexGuard<'_, AdapterRuntime> {
    runtime.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_open_matches_same_unchanged_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        std::fs::write(&a, b"aaaa").unwrap();
        std::fs::write(&b, b"bbbb").unwrap();

        let mut rt = AdapterRuntime::new();
        rt.remember_open(&a, &RgbaImage::new(2, 2), FileType::Png);
        assert!(rt.previous_open(&a).is_some());
        assert!(rt.previous_open(&b).is_none());
    }

    #[test]
    fn rewritten_file_is_not_reused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.png");
        std::fs::write(&a, b"aaaa").unwrap();

        let mut rt = AdapterRuntime::new();
        rt.remember_open(&a, &RgbaImage::new(2, 2), FileType::Png);
        std::fs::write(&a, b"longer contents").unwrap();
        assert!(rt.previous_open(&a).is_none());
    }

    #[test]
    fn missing_file_is_never_reused() {
        let mut rt = AdapterRuntime::new();
        rt.remember_open(Path::new("/nonexistent/a.png"), &RgbaImage::new(1, 1), FileType::Png);
        assert!(rt.previous_open(Path::new("/nonexistent/a.png")).is_none());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let shared = AdapterRuntime::shared();
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(shared.is_poisoned());
        assert!(lock(&shared).watermarks.is_empty());
    }
}
