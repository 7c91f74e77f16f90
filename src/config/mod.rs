//! Application Configuration
//!
//! Tuning constants for every pipeline stage, stored in TOML format. The
//! defaults are the empirically derived values the pipeline was tuned with on
//! phone photos of ruled tables.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::SheetFormat;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Binarization settings
    pub preprocess: PreprocessSettings,
    /// Rule line and cell detection settings
    pub detection: DetectionSettings,
    /// Row grouping settings
    pub grouping: GroupingSettings,
    /// Text recognition settings
    pub recognition: RecognitionSettings,
    /// Output settings
    pub output: OutputSettings,
    /// Diagnostic image settings
    pub debug: DebugSettings,
    /// Performance settings
    pub performance: PerformanceConfig,
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let pp = &self.preprocess;
        if pp.threshold_block_size < 3 || pp.threshold_block_size % 2 == 0 {
            bail!(
                "preprocess.threshold_block_size must be odd and >= 3, got {}",
                pp.threshold_block_size
            );
        }
        if pp.clahe_tile_grid == 0 {
            bail!("preprocess.clahe_tile_grid must be at least 1");
        }
        if pp.clahe_clip_limit <= 0.0 {
            bail!("preprocess.clahe_clip_limit must be positive");
        }

        let det = &self.detection;
        if det.horizontal_kernel == 0 || det.vertical_kernel == 0 {
            bail!("detection kernels must be at least 1 pixel long");
        }
        if det.count_iterations == 0 || det.mask_iterations == 0 {
            bail!("detection iterations must be at least 1");
        }
        if det.min_dim >= det.max_dim {
            bail!(
                "detection.min_dim ({}) must be below detection.max_dim ({})",
                det.min_dim,
                det.max_dim
            );
        }

        if self.grouping.row_threshold == 0 {
            bail!("grouping.row_threshold must be positive");
        }

        if self.recognition.target_height == 0 || self.recognition.max_width == 0 {
            bail!("recognition input size must be non-zero");
        }

        if self.performance.workers == 0 {
            bail!("performance.workers must be at least 1");
        }

        Ok(())
    }
}

/// Image preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Border stroke drawn around the image margin (pixels)
    pub border_thickness: u32,
    /// Gaussian blur sigma (1.1 matches a 5x5 kernel)
    pub blur_sigma: f32,
    /// Median denoise radius applied after the blur
    pub denoise_radius: u32,
    /// Unsharp mask weight: `gray * (1 + a) - denoised * a`
    pub sharpen_amount: f32,
    /// CLAHE clip limit
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis
    pub clahe_tile_grid: u32,
    /// Adaptive threshold neighbourhood (odd)
    pub threshold_block_size: u32,
    /// Subtracted from the local mean before comparison
    pub threshold_offset: i32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            border_thickness: 2,
            blur_sigma: 1.1,
            denoise_radius: 1,
            sharpen_amount: 0.5,
            clahe_clip_limit: 75.0,
            clahe_tile_grid: 8,
            threshold_block_size: 49,
            threshold_offset: 1,
        }
    }
}

/// Rule line and cell detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Horizontal structuring element length
    pub horizontal_kernel: u32,
    /// Vertical structuring element length
    pub vertical_kernel: u32,
    /// Opening iterations for the line-count diagnostic pass
    pub count_iterations: u32,
    /// Opening iterations for the structure mask
    pub mask_iterations: u32,
    /// Dilation radius used to bridge broken rules (1 = 3x3)
    pub dilate_radius: u8,
    /// Cells must be wider and taller than this
    pub min_dim: u32,
    /// Cells must be narrower and shorter than this
    pub max_dim: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            horizontal_kernel: 100,
            vertical_kernel: 100,
            count_iterations: 1,
            mask_iterations: 2,
            dilate_radius: 1,
            min_dim: 20,
            max_dim: 1000,
        }
    }
}

/// Row grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSettings {
    /// Maximum y distance (pixels, exclusive) between cells of one row
    pub row_threshold: u32,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self { row_threshold: 20 }
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Median smoothing radius for cell crops (1 = 3x3)
    pub smoothing_radius: u32,
    /// Recognition model language
    pub language: String,
    /// Override for the model cache directory
    pub model_dir: Option<PathBuf>,
    /// Fragments below this confidence are dropped
    pub min_confidence: f32,
    /// Model input height
    pub target_height: u32,
    /// Maximum model input width
    pub max_width: u32,
    /// Dictionary is extended with a space character
    pub use_space_char: bool,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            smoothing_radius: 1,
            language: "english".to_string(),
            model_dir: None,
            min_confidence: 0.5,
            target_height: 48,
            max_width: 640,
            use_space_char: true,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Forced output format; otherwise taken from the output extension
    pub format: Option<SheetFormat>,
}

/// Diagnostic image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Write an annotated image of the detected cells
    pub enabled: bool,
    /// Directory for annotated images (created on demand)
    pub directory: PathBuf,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("debug_detected_cells"),
        }
    }
}

/// Performance-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Conversions run in parallel in batch mode
    pub workers: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            intra_threads: 4,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.preprocess.border_thickness, 2);
        assert!((config.preprocess.clahe_clip_limit - 75.0).abs() < 0.01);
        assert_eq!(config.preprocess.clahe_tile_grid, 8);
        assert_eq!(config.preprocess.threshold_block_size, 49);
        assert_eq!(config.preprocess.threshold_offset, 1);

        assert_eq!(config.detection.horizontal_kernel, 100);
        assert_eq!(config.detection.vertical_kernel, 100);
        assert_eq!(config.detection.count_iterations, 1);
        assert_eq!(config.detection.mask_iterations, 2);
        assert_eq!(config.detection.min_dim, 20);
        assert_eq!(config.detection.max_dim, 1000);

        assert_eq!(config.grouping.row_threshold, 20);
        assert_eq!(config.recognition.smoothing_radius, 1);
        assert!(config.output.format.is_none());
        assert!(config.debug.enabled);
        assert_eq!(config.debug.directory, PathBuf::from("debug_detected_cells"));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.grouping.row_threshold = 35;
        config.output.format = Some(SheetFormat::Csv);
        config.recognition.model_dir = Some(PathBuf::from("/opt/models"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.grouping.row_threshold, 35);
        assert_eq!(parsed.output.format, Some(SheetFormat::Csv));
        assert_eq!(parsed.recognition.model_dir, Some(PathBuf::from("/opt/models")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[grouping]\nrow_threshold = 12\n").unwrap();
        assert_eq!(parsed.grouping.row_threshold, 12);
        assert_eq!(parsed.detection.max_dim, 1000);
        assert_eq!(parsed.preprocess.threshold_block_size, 49);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.detection.min_dim, loaded.detection.min_dim);
        assert_eq!(config.grouping.row_threshold, loaded.grouping.row_threshold);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.preprocess.threshold_block_size = 48;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.min_dim = 1000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.grouping.row_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.mask_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_runs_validation() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[preprocess]\nthreshold_block_size = 4").unwrap();
        assert!(load_config(temp_file.path()).is_err());
    }
}
