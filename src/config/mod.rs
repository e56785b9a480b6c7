//! Configuration types for the range pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::processors::filtering::HeightBand;

/// Configuration for reading the calibration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Number of title rows preceding the header row
    #[serde(default)]
    pub header_row: usize,

    /// Maximum number of sensor rows to read (None for all)
    #[serde(default)]
    pub max_sensors: Option<usize>,

    /// Radial distortion used for D-Imager sensors without an explicit value.
    ///
    /// Applied to every tag spelling of the D-Imager type. Logs calibrated with
    /// the `D-IMager` tag were historically projected without distortion; set
    /// this to 0 to reproduce those point clouds.
    #[serde(default = "default_dimager_radial_distortion")]
    pub dimager_radial_distortion: f64,
}

fn default_dimager_radial_distortion() -> f64 {
    -2.23197e-5
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            header_row: 0,
            max_sensors: None,
            dimager_radial_distortion: default_dimager_radial_distortion(),
        }
    }
}

/// Configuration for the frame decoder loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Treat a truncated final frame as the end of the log
    #[serde(default = "default_tolerate_truncated")]
    pub tolerate_truncated: bool,
}

fn default_tolerate_truncated() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            tolerate_truncated: default_tolerate_truncated(),
        }
    }
}

/// Configuration for point cloud post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Lower bound of the kept height band (mm, exclusive)
    #[serde(default = "default_min_height")]
    pub min_height_mm: f64,

    /// Upper bound of the kept height band (mm, exclusive)
    #[serde(default = "default_max_height")]
    pub max_height_mm: f64,

    /// Stride for subsampling points
    #[serde(default = "default_point_stride")]
    pub point_stride: usize,

    /// Maximum frames converted per log (None for all)
    #[serde(default)]
    pub max_frames: Option<usize>,

    /// Index of the log file used per sensor when building a map
    #[serde(default)]
    pub log_file_index: usize,
}

fn default_min_height() -> f64 {
    1500.0
}

fn default_max_height() -> f64 {
    5000.0
}

fn default_point_stride() -> usize {
    1
}

impl ProcessingConfig {
    /// Height band described by this configuration.
    pub fn height_band(&self) -> HeightBand {
        HeightBand::new(self.min_height_mm, self.max_height_mm)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_height_mm: default_min_height(),
            max_height_mm: default_max_height(),
            point_stride: default_point_stride(),
            max_frames: None,
            log_file_index: 0,
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.processing.min_height_mm, 1500.0);
        assert_eq!(config.processing.max_height_mm, 5000.0);
        assert_eq!(config.processing.point_stride, 1);
        assert!(config.decoder.tolerate_truncated);
        assert_eq!(config.calibration.dimager_radial_distortion, -2.23197e-5);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("processing:\n  min_height_mm: 1000.0\n").unwrap();
        assert_eq!(config.processing.min_height_mm, 1000.0);
        assert_eq!(config.processing.max_height_mm, 5000.0);
        assert_eq!(config.calibration.header_row, 0);
    }

    #[test]
    fn test_yaml_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.calibration.header_row = 1;
        config.calibration.max_sensors = Some(49);
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.calibration.header_row, 1);
        assert_eq!(loaded.calibration.max_sensors, Some(49));
    }
}
