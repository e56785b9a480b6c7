//! Range sensor log to point cloud pipeline.
//!
//! This crate provides tools for:
//! - Loading per-sensor calibration tables from CSV
//! - Decoding framed range logs recorded by D-Imager and Velodyne sensors
//! - Correcting raw ranges and projecting them into world coordinates
//! - Merging snapshots from several sensors into one height-filtered map
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use range_pipeline::config::CalibrationConfig;
//! use range_pipeline::core::{load_calibration_csv, SensorRegistry};
//! use range_pipeline::processors::{convert_log, lookup_sensor, ConvertOptions};
//!
//! let config = CalibrationConfig::default();
//! let table = load_calibration_csv(Path::new("calib.csv"), &config).unwrap();
//! let registry = SensorRegistry::from(table);
//! let sensor = lookup_sensor(&registry, "dimager_01").unwrap();
//! let clouds = convert_log(sensor, Path::new("log.bin"), &ConvertOptions::default()).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{CalibrationConfig, DecoderConfig, PipelineConfig, ProcessingConfig};
pub use core::loaders::PointCloud;
pub use core::registry::SensorRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
