//! # rastermark
//!
//! Backend-agnostic raster processing: open an image, resize, rotate, crop,
//! watermark and save it, with the embedded ICC colour profile surviving the
//! trip for JPEG files.
//!
//! # Architecture
//!
//! ```text
//! jpeg::segment  ─┐
//! jpeg::icc      ─┼─ byte-level JPEG: find segments, read/write APP2 ICC chunks
//!                 │
//! imaging        ─┼─ RasterAdapter trait + three backends + watermark cache
//!                 │
//! process        ─┴─ batch runner: config → plan → adapter per file (rayon)
//! ```
//!
//! The JPEG layer knows nothing about pixels. The imaging layer decodes with
//! the `image` crate, which drops colour profiles, so the reference backend
//! extracts the profile from the source bytes on open and re-injects it into
//! the encoded output on save.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`jpeg`] | Marker scanner and ICC profile extract/inject over raw JPEG bytes |
//! | [`imaging`] | Adapter trait, backends, geometry calculations, compositing, watermark cache |
//! | [`config`] | `config.toml` loading, validation and merging over stock defaults |
//! | [`cache`] | Image-info manifest and the parameter hash that names output directories |
//! | [`process`] | Input discovery and parallel batch processing |
//!
//! # Design Decisions
//!
//! ## Explicit Runtime State
//!
//! The watermark bitmaps and the last decoded file are process-wide caches.
//! They live in an [`imaging::AdapterRuntime`] that is created by the caller
//! and handed to every adapter, behind one mutex. Tests get a fresh runtime
//! each; the batch runner shares one across its rayon workers.
//!
//! ## Corrupt Profiles Never Block Images
//!
//! A malformed or incomplete ICC chunk set is logged and treated as absent.
//! An image that cannot carry its profile (more than 255 chunks) is still
//! saved, without the profile, and a warning is logged.
//!
//! ## Encode, Then Write Once
//!
//! Every backend encodes into memory and writes the finished buffer in a
//! single call, so a failed encode never leaves a partial file behind.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod jpeg;
pub mod process;

#[cfg(test)]
pub(crate) mod test_helpers;
