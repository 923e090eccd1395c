//! Processing configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user file overrides only the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! backend = "raster"          # raster | fir | imageproc
//!
//! [quality]
//! default = 0                 # 0 = let the encoder decide
//!
//! [quality.types]             # per image type, 0 falls back to default
//! # thumbnail = 70
//!
//! [geometry]
//! keep_frame = false
//! constrain_only = true
//! keep_aspect_ratio = true
//! keep_transparency = true
//! background = [255, 255, 255]
//!
//! [watermark]
//! # image = "watermark.png"   # no image = no watermark
//! position = "bottom-right"
//! # size = [200, 80]
//! opacity = 100
//! offset = [0, 0]
//!
//! [processing]
//! max_processes = 4           # omit for auto = CPU cores
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{
    AdapterOptions, BackendKind, GeometryFlags, Quality, WatermarkPosition, WatermarkSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RastermarkConfig {
    /// Which engine processes images.
    pub backend: BackendKind,
    pub quality: QualityConfig,
    pub geometry: GeometryConfig,
    pub watermark: WatermarkConfig,
    pub processing: ProcessingConfig,
}

impl RastermarkConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality.default > 100 {
            return Err(ConfigError::Validation("quality.default must be 0-100".into()));
        }
        if let Some((name, _)) = self.quality.types.iter().find(|(_, q)| **q > 100) {
            return Err(ConfigError::Validation(format!(
                "quality.types.{name} must be 0-100"
            )));
        }
        if self.watermark.opacity > 100 {
            return Err(ConfigError::Validation(
                "watermark.opacity must be 0-100".into(),
            ));
        }
        if matches!(self.watermark.size, Some([0, _]) | Some([_, 0])) {
            return Err(ConfigError::Validation(
                "watermark.size values must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Make a relative watermark path relative to the config's directory.
    pub fn anchor_paths(&mut self, config_dir: &Path) {
        if let Some(image) = &self.watermark.image
            && image.is_relative()
        {
            self.watermark.image = Some(config_dir.join(image));
        }
    }

    /// Quality for an image type: per-type value, then the default, then unset.
    pub fn resolve_quality(&self, image_type: Option<&str>) -> Quality {
        image_type
            .and_then(|t| self.quality.types.get(t))
            .copied()
            .filter(|&q| q > 0)
            .map(Quality::new)
            .unwrap_or_else(|| Quality::new(self.quality.default))
    }

    /// Watermark layout handed to adapters, or `None` without an image.
    pub fn watermark_settings(&self) -> Option<WatermarkSettings> {
        self.watermark.image.as_ref()?;
        Some(WatermarkSettings {
            position: Some(self.watermark.position),
            width: self.watermark.size.map(|[w, _]| w),
            height: self.watermark.size.map(|[_, h]| h),
            opacity: Some(self.watermark.opacity),
        })
    }

    /// Everything an adapter needs for one image type.
    pub fn adapter_options(&self, image_type: Option<&str>) -> AdapterOptions {
        AdapterOptions {
            flags: self.geometry.flags(),
            quality: self.resolve_quality(image_type),
            background: self.geometry.background,
            watermark: self.watermark_settings().unwrap_or_default(),
        }
    }
}

/// Encoder quality, globally and per image type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// 0 = unset.
    pub default: u32,
    pub types: BTreeMap<String, u32>,
}

/// Geometry flags plus the fill colour used for frames and flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometryConfig {
    pub keep_frame: bool,
    pub constrain_only: bool,
    pub keep_aspect_ratio: bool,
    pub keep_transparency: bool,
    pub background: [u8; 3],
}

impl Default for GeometryConfig {
    fn default() -> Self {
        let flags = GeometryFlags::default();
        Self {
            keep_frame: flags.keep_frame,
            constrain_only: flags.constrain_only,
            keep_aspect_ratio: flags.keep_aspect_ratio,
            keep_transparency: flags.keep_transparency,
            background: [255, 255, 255],
        }
    }
}

impl GeometryConfig {
    pub fn flags(&self) -> GeometryFlags {
        GeometryFlags {
            keep_frame: self.keep_frame,
            constrain_only: self.constrain_only,
            keep_aspect_ratio: self.keep_aspect_ratio,
            keep_transparency: self.keep_transparency,
        }
    }
}

/// Watermark applied to every processed image when `image` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    pub image: Option<PathBuf>,
    pub position: WatermarkPosition,
    /// Target `[width, height]`; omitted means the watermark's own size.
    pub size: Option<[u32; 2]>,
    pub opacity: u8,
    /// Start offset for `tile` and pixel origin for explicit placement.
    pub offset: [i64; 2],
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            image: None,
            position: WatermarkPosition::BottomRight,
            size: None,
            opacity: 100,
            offset: [0, 0],
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image processing workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores).max(1)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(RastermarkConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(config_path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<RastermarkConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: RastermarkConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `config.toml` from a directory, falling back to defaults when absent.
pub fn load_config(dir: &Path) -> Result<RastermarkConfig, ConfigError> {
    let mut config = resolve_config(load_raw_config(&dir.join("config.toml"))?)?;
    config.anchor_paths(dir);
    Ok(config)
}

/// Load an explicitly named config file; a missing file is an error.
pub fn load_config_file(path: &Path) -> Result<RastermarkConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    let mut config = resolve_config(Some(overlay))?;
    if let Some(dir) = path.parent() {
        config.anchor_paths(dir);
    }
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# rastermark configuration
# ========================
# Every key is optional. Values shown are the defaults.

# Engine used for every image:
#   raster    - reference engine, keeps embedded ICC colour profiles (JPEG)
#   fir       - SIMD resampling via fast_image_resize
#   imageproc - imageproc geometry, reuses the last decode of the same file
backend = "raster"

[quality]
# Encoder quality 1-100. 0 leaves the choice to the encoder.
# Only JPEG output takes a quality; PNG always uses best compression.
default = 0

[quality.types]
# Per image type, selected with `process --type NAME`.
# thumbnail = 70
# small_image = 80

[geometry]
# Pad the result to exactly the requested frame.
keep_frame = false
# Never upscale past the source size.
constrain_only = true
# Preserve the source aspect ratio inside the frame.
keep_aspect_ratio = true
# Keep alpha where the format allows it; padding becomes transparent.
keep_transparency = true
# Fill for frame padding, rotation corners and flattening, as [r, g, b].
background = [255, 255, 255]

[watermark]
# Watermark image. Without one no watermark is applied.
# image = "watermark.png"
# stretch | tile | top-left | top-right | bottom-left | bottom-right | center
position = "bottom-right"
# Resize the watermark to [width, height] before placing it.
# size = [200, 80]
# 0-100. Below 100 the watermark is faded and cached separately.
opacity = 100
# Tiling start point, as [x, y].
offset = [0, 0]

[processing]
# Maximum parallel workers. Omit for one per CPU core.
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = RastermarkConfig::default();
        assert_eq!(config.backend, BackendKind::Raster);
        assert_eq!(config.quality.default, 0);
        assert!(config.geometry.constrain_only);
        assert!(!config.geometry.keep_frame);
        assert_eq!(config.watermark.position, WatermarkPosition::BottomRight);
        assert_eq!(config.watermark.opacity, 100);
        assert!(config.watermark.image.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
backend = "fir"

[geometry]
keep_frame = true
"#;
        let config: RastermarkConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend, BackendKind::Fir);
        assert!(config.geometry.keep_frame);
        // untouched keys keep their defaults
        assert!(config.geometry.keep_transparency);
        assert_eq!(config.geometry.background, [255, 255, 255]);
    }

    #[test]
    fn parse_watermark_section() {
        let toml = r#"
[watermark]
image = "wm.png"
position = "tile"
size = [50, 50]
opacity = 40
"#;
        let config: RastermarkConfig = toml::from_str(toml).unwrap();
        let settings = config.watermark_settings().unwrap();
        assert_eq!(settings.position, Some(WatermarkPosition::Tile));
        assert_eq!(settings.size(), Some((50, 50)));
        assert_eq!(settings.opacity, Some(40));
    }

    #[test]
    fn watermark_settings_absent_without_image() {
        let config = RastermarkConfig::default();
        assert!(config.watermark_settings().is_none());
        assert_eq!(
            config.adapter_options(None).watermark,
            WatermarkSettings::default()
        );
    }

    // =========================================================================
    // Quality resolution
    // =========================================================================

    #[test]
    fn resolve_quality_prefers_type() {
        let toml = r#"
[quality]
default = 85

[quality.types]
thumbnail = 60
small_image = 0
"#;
        let config: RastermarkConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.resolve_quality(Some("thumbnail")).value(), Some(60));
        assert_eq!(config.resolve_quality(Some("small_image")).value(), Some(85));
        assert_eq!(config.resolve_quality(Some("unknown")).value(), Some(85));
        assert_eq!(config.resolve_quality(None).value(), Some(85));
    }

    #[test]
    fn resolve_quality_unset_by_default() {
        let config = RastermarkConfig::default();
        assert_eq!(config.resolve_quality(Some("thumbnail")), Quality::unset());
    }

    #[test]
    fn adapter_options_carry_geometry() {
        let toml = r#"
[geometry]
keep_frame = true
keep_transparency = false
background = [0, 0, 0]
"#;
        let config: RastermarkConfig = toml::from_str(toml).unwrap();
        let options = config.adapter_options(None);
        assert!(options.flags.keep_frame);
        assert!(!options.flags.keep_transparency);
        assert_eq!(options.background, [0, 0, 0]);
    }

    // =========================================================================
    // Processing
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let config = ProcessingConfig {
            max_processes: None,
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let config = ProcessingConfig {
            max_processes: Some(99999),
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_zero_means_one() {
        let config = ProcessingConfig {
            max_processes: Some(0),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // Loading and merging
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Raster);
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            "backend = \"imageproc\"\n[quality]\ndefault = 75\n",
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Imageproc);
        assert_eq!(config.quality.default, 75);
    }

    #[test]
    fn watermark_path_is_relative_to_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            "[watermark]\nimage = \"marks/wm.png\"\n",
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.watermark.image, Some(tmp.path().join("marks/wm.png")));

        let absolute = tmp.path().join("abs.toml");
        fs::write(&absolute, "[watermark]\nimage = \"/srv/wm.png\"\n").unwrap();
        let config = load_config_file(&absolute).unwrap();
        assert_eq!(config.watermark.image, Some(PathBuf::from("/srv/wm.png")));
    }

    #[test]
    fn load_config_file_missing_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config_file(&tmp.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let toml = r#"
[geometry]
keep_fram = true
"#;
        let result: Result<RastermarkConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let result: Result<RastermarkConfig, _> = toml::from_str(r#"backend = "magick""#);
        assert!(result.is_err());
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str(
            r#"
[geometry]
keep_frame = false
constrain_only = true
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[geometry]
keep_frame = true
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let geometry = merged.get("geometry").unwrap();
        assert_eq!(geometry.get("keep_frame").unwrap().as_bool(), Some(true));
        assert_eq!(geometry.get("constrain_only").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str(r#"backend = "raster""#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"backend = "fir""#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("backend").unwrap().as_str(), Some("fir"));
    }

    #[test]
    fn resolve_config_rejects_invalid_values() {
        let overlay: toml::Value = toml::from_str(
            r#"
[quality]
default = 200
"#,
        )
        .unwrap();
        assert!(matches!(
            resolve_config(Some(overlay)),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn validate_type_quality_too_high() {
        let mut config = RastermarkConfig::default();
        config.quality.types.insert("thumbnail".into(), 101);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_zero_watermark_size() {
        let mut config = RastermarkConfig::default();
        config.watermark.size = Some([0, 10]);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(RastermarkConfig::default().validate().is_ok());
    }

    // =========================================================================
    // stock_config_toml tests
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: RastermarkConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = RastermarkConfig::default();
        assert_eq!(config.backend, defaults.backend);
        assert_eq!(config.quality, defaults.quality);
        assert_eq!(config.geometry, defaults.geometry);
        assert_eq!(config.watermark, defaults.watermark);
        assert_eq!(config.processing.max_processes, None);
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[quality]", "[quality.types]", "[geometry]", "[watermark]", "[processing]"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value().unwrap();
        assert!(val.is_table());
        assert!(val.get("quality").is_some());
        assert!(val.get("geometry").is_some());
        assert!(val.get("watermark").is_some());
        assert!(val.get("processing").is_some());
    }
}
