//! Batch processing.
//!
//! Takes one image or a directory of images, runs the configured operations
//! through the configured backend, and writes each result under a directory
//! named after the parameter hash.
//!
//! ## Output Structure
//!
//! ```text
//! out/
//! ├── .image-info.json                # dimensions of everything written
//! └── 3f9a…c1/                        # hash_params(backend, options, plan)
//!     ├── dawn.jpg
//!     └── trips/
//!         └── mountains.png             # input layout is kept below the hash
//! ```
//!
//! Rerunning with the same parameters skips files whose output is already
//! recorded in `.image-info.json`, still on disk, and made from a source with
//! the same content hash.
//!
//! ## Parallel Processing
//!
//! Images are processed in parallel using [rayon](https://docs.rs/rayon).
//! Every job builds its own adapter; all jobs share one
//! [`AdapterRuntime`](crate::imaging::AdapterRuntime), so a watermark is
//! built once per run no matter how many workers use it. A failing file is
//! reported and the rest of the batch carries on.

use crate::cache::{CacheStats, ImageInfo, ImageInfoCache, hash_file, hash_params};
use crate::config::RastermarkConfig;
use crate::imaging::{
    AdapterError, AdapterOptions, AdapterRuntime, BackendKind, OperationPlan, RasterAdapter,
    WatermarkCacheStats, WatermarkJob, WatermarkPosition, create_adapter, run_operations,
    supported_input_extensions,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image processing failed: {0}")]
    Imaging(#[from] AdapterError),
    #[error("Source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Not a supported image: {}", .0.display())]
    UnsupportedInput(PathBuf),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Everything that decides what one run does to each file.
#[derive(Debug, Clone)]
pub struct ProcessParams {
    pub backend: BackendKind,
    pub options: AdapterOptions,
    pub plan: OperationPlan,
    /// Skip files already recorded in the image-info manifest.
    pub use_cache: bool,
}

impl ProcessParams {
    /// Resolve adapter options and the watermark step for an image type.
    ///
    /// Geometry (`width`, `height`, `rotate`, `crop`) is left for the caller.
    pub fn from_config(config: &RastermarkConfig, image_type: Option<&str>) -> Self {
        let watermark = config.watermark.image.as_ref().map(|image| WatermarkJob {
            image: image.clone(),
            x: config.watermark.offset[0],
            y: config.watermark.offset[1],
            opacity: config.watermark.opacity,
            tile: config.watermark.position == WatermarkPosition::Tile,
        });
        Self {
            backend: config.backend,
            options: config.adapter_options(image_type),
            plan: OperationPlan {
                watermark,
                ..OperationPlan::default()
            },
            use_cache: true,
        }
    }

    /// Directory name for outputs of this run.
    pub fn output_hash(&self) -> String {
        hash_params(self.backend, &self.options, &self.plan)
    }
}

/// A source image and where its output goes below the hash directory.
#[derive(Debug, Clone, PartialEq)]
pub struct InputImage {
    pub source: PathBuf,
    /// Path relative to the input root, reused under the output directory.
    pub relative: PathBuf,
}

impl InputImage {
    /// A file given on its own; its output is named after it.
    pub fn from_file(source: &Path) -> Result<Self, ProcessError> {
        let name = source
            .file_name()
            .ok_or_else(|| ProcessError::UnsupportedInput(source.to_path_buf()))?;
        Ok(Self {
            source: source.to_path_buf(),
            relative: PathBuf::from(name),
        })
    }
}

/// One written (or reused) output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Output was already on disk from an earlier run.
    pub cached: bool,
}

/// Progress reported while a batch runs.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { total: usize, backend: BackendKind },
    Processed(ProcessedFile),
    Failed { source: PathBuf, error: String },
}

/// Outcome of [`process_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<ProcessedFile>,
    pub failed: Vec<(PathBuf, String)>,
    pub watermark_stats: WatermarkCacheStats,
    pub cache_stats: CacheStats,
}

impl BatchReport {
    pub fn cached_count(&self) -> usize {
        self.processed.iter().filter(|p| p.cached).count()
    }
}

/// Collect every supported image at `input`.
///
/// A file is returned as-is if its extension is supported. A directory is
/// walked recursively in file-name order, skipping hidden entries; each file
/// keeps its path relative to `input`.
pub fn collect_inputs(input: &Path) -> Result<Vec<InputImage>, ProcessError> {
    if !input.exists() {
        return Err(ProcessError::SourceNotFound(input.to_path_buf()));
    }
    if input.is_file() {
        return if is_supported(input) {
            Ok(vec![InputImage::from_file(input)?])
        } else {
            Err(ProcessError::UnsupportedInput(input.to_path_buf()))
        };
    }

    let mut inputs = Vec::new();
    let walker = WalkDir::new(input)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            let relative = match entry.path().strip_prefix(input) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => PathBuf::from(entry.file_name()),
            };
            inputs.push(InputImage {
                source: entry.into_path(),
                relative,
            });
        }
    }
    Ok(inputs)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| supported_input_extensions().contains(&e.as_str()))
}

/// Process one file with an already-built adapter.
///
/// Writes `<output_root>/<hash>/<relative path>`, or reuses it when the
/// manifest says it was made from the same source bytes and is still there.
pub fn process_file(
    adapter: &mut dyn RasterAdapter,
    input: &InputImage,
    output_root: &Path,
    params: &ProcessParams,
    info_cache: &Mutex<ImageInfoCache>,
) -> Result<ProcessedFile, ProcessError> {
    let source = input.source.as_path();
    if !source.is_file() {
        return Err(ProcessError::SourceNotFound(source.to_path_buf()));
    }
    let target = output_root.join(params.output_hash()).join(&input.relative);
    let source_hash = hash_file(source)?;

    if params.use_cache {
        let mut cache = info_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = cache.lookup_output(&target, &source_hash) {
            tracing::debug!(source = %source.display(), "output up to date");
            return Ok(ProcessedFile {
                source: source.to_path_buf(),
                output: target,
                width: info.width,
                height: info.height,
                cached: true,
            });
        }
    }

    let result = run_operations(adapter, source, &params.plan, Some(&target), None)?;

    info_cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            &result.path,
            ImageInfo {
                width: result.width,
                height: result.height,
                format: Some(result.file_type),
                source_hash: Some(source_hash),
            },
        );

    Ok(ProcessedFile {
        source: source.to_path_buf(),
        output: result.path,
        width: result.width,
        height: result.height,
        cached: false,
    })
}

/// Process `inputs` in parallel with one shared runtime.
///
/// Per-file failures are collected in the report; only manifest I/O fails
/// the whole batch.
pub fn process_batch(
    inputs: &[InputImage],
    output_root: &Path,
    params: &ProcessParams,
    events: Option<Sender<ProcessEvent>>,
) -> Result<BatchReport, ProcessError> {
    std::fs::create_dir_all(output_root)?;
    let runtime = AdapterRuntime::shared();
    let info_cache = Mutex::new(if params.use_cache {
        ImageInfoCache::load(output_root)
    } else {
        ImageInfoCache::empty()
    });

    if let Some(tx) = &events {
        tx.send(ProcessEvent::Started {
            total: inputs.len(),
            backend: params.backend,
        })
        .ok();
    }
    tracing::info!(
        files = inputs.len(),
        backend = %params.backend,
        output = %output_root.display(),
        "processing batch"
    );

    let results: Vec<(PathBuf, Result<ProcessedFile, ProcessError>)> = inputs
        .par_iter()
        .map_with(events, |tx, input| {
            let source = &input.source;
            let mut adapter = create_adapter(params.backend, runtime.clone(), params.options);
            let result = process_file(adapter.as_mut(), input, output_root, params, &info_cache);
            if let Some(tx) = tx {
                let event = match &result {
                    Ok(file) => ProcessEvent::Processed(file.clone()),
                    Err(e) => ProcessEvent::Failed {
                        source: source.clone(),
                        error: e.to_string(),
                    },
                };
                tx.send(event).ok();
            }
            (source.clone(), result)
        })
        .collect();

    let mut report = BatchReport::default();
    for (source, result) in results {
        match result {
            Ok(file) => report.processed.push(file),
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "failed to process image");
                report.failed.push((source, e.to_string()));
            }
        }
    }

    let info_cache = info_cache.into_inner().unwrap_or_else(PoisonError::into_inner);
    info_cache.save(output_root)?;
    report.cache_stats = info_cache.stats().clone();
    report.watermark_stats = crate::imaging::runtime::lock(&runtime).watermarks.stats();

    Ok(report)
}
