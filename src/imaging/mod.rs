//! Raster adapters: one contract, three engines.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (JPEG, PNG, GIF, WebP) |
//! | **Resize** | `image` Lanczos3 or `fast_image_resize` Lanczos3 |
//! | **Rotate** | `image::imageops::rotate*`, `imageproc::rotate_about_center` |
//! | **Watermark** | [`WatermarkCache`] + `image::imageops::overlay` |
//! | **Encode** | `image` encoders, in memory; ICC re-embedded for JPEG |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry and cache keys (unit testable)
//! - **Parameters**: Flags, quality, watermark layout
//! - **Adapter**: [`RasterAdapter`] trait + [`create_adapter`]
//! - **Backends**: [`RasterBackend`], [`FirBackend`], [`ImageprocBackend`]
//! - **Shared pixel code**: compositor, transform, encode
//! - **State**: [`AdapterRuntime`] holding the [`WatermarkCache`]
//! - **Operations**: High-level sequences run against any adapter

pub mod adapter;
mod calculations;
pub mod compositor;
pub mod encode;
pub mod fir_backend;
pub mod imageproc_backend;
pub mod operations;
mod params;
pub mod raster_backend;
pub mod runtime;
pub mod transform;
pub mod watermark_cache;

pub use adapter::{
    AdapterError, BackendKind, RasterAdapter, RasterHandle, create_adapter,
    supported_input_extensions,
};
pub use calculations::{
    GeometryConvention, ResizePlan, adapt_resize_values, crop_size, rotated_bounds, tile_offsets,
    watermark_cache_path, watermark_geometry, watermark_placement,
};
pub use fir_backend::FirBackend;
pub use imageproc_backend::ImageprocBackend;
pub use operations::{OperationPlan, ProcessedImage, WatermarkJob, run_operations};
pub use params::{
    AdapterOptions, FileType, GeometryFlags, Quality, RgbaColor, WatermarkPosition,
    WatermarkSettings,
};
pub use raster_backend::RasterBackend;
pub use runtime::{AdapterRuntime, SharedRuntime};
pub use watermark_cache::{WatermarkCache, WatermarkCacheStats, WatermarkRequest};
