//! Sensor log to point cloud extraction.
//!
//! Ties the pipeline together: frames are decoded sequentially from one log,
//! corrected, and projected with the sensor's cached transform factors.
//! Different sensors are independent and are processed in parallel.

use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::core::frame::{FrameDecoder, FrameError, RawFrame};
use crate::core::loaders::{nth_log_file, open_log, LoaderError, PointCloud};
use crate::core::registry::{Sensor, SensorRegistry};
use crate::core::transforms::{project_to_world, ProjectionError, TransformError};
use crate::processors::correction::correct_ranges;
use crate::processors::filtering::{filter_height_band, HeightBand};

/// Errors that can occur while extracting point clouds.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("Frame decoding failed: {0}")]
    Frame(#[from] FrameError),

    #[error("Transform factors unavailable: {0}")]
    Transform(#[from] TransformError),

    #[error("Projection failed for sensor '{sensor}': {source}")]
    Projection {
        sensor: String,
        #[source]
        source: ProjectionError,
    },

    #[error("Log contains no frames: {0}")]
    EmptyLog(PathBuf),
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Options for converting one sensor log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertOptions {
    /// Maximum number of frames to convert (None for all).
    pub max_frames: Option<usize>,
    /// Stop quietly at a truncated final frame instead of failing.
    pub tolerate_truncated: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            max_frames: None,
            tolerate_truncated: true,
        }
    }
}

impl From<&PipelineConfig> for ConvertOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_frames: config.processing.max_frames,
            tolerate_truncated: config.decoder.tolerate_truncated,
        }
    }
}

/// Options for building a multi-sensor snapshot map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOptions {
    /// Which log file (sorted by name) to read per sensor.
    pub log_file_index: usize,
    /// Height band applied to the combined cloud (None keeps everything).
    pub band: Option<HeightBand>,
}

impl From<&PipelineConfig> for MapOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            log_file_index: config.processing.log_file_index,
            band: Some(config.processing.height_band()),
        }
    }
}

/// Point cloud of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCloud {
    pub timestamp_ms: i64,
    pub cloud: PointCloud,
}

/// Result of a multi-sensor map extraction.
#[derive(Debug, Default)]
pub struct MapResult {
    /// Combined cloud of all successful sensors, in sensor name order.
    pub cloud: PointCloud,
    /// Latest frame timestamp among the successful sensors.
    pub timestamp_ms: Option<i64>,
    /// Points contributed per sensor before the height band.
    pub contributions: Vec<(String, usize)>,
    /// Sensors that were skipped and why.
    pub failures: Vec<(String, ExtractionError)>,
}

/// Look up a sensor by name.
pub fn lookup_sensor<'a>(registry: &'a SensorRegistry, name: &str) -> Result<&'a Sensor> {
    registry
        .get(name)
        .ok_or_else(|| ExtractionError::UnknownSensor(name.to_string()))
}

/// Correct and project a single frame.
///
/// # Errors
///
/// Returns an error if the sensor's transform factors cannot be built or the
/// frame's sample count does not match the sensor resolution.
pub fn frame_to_cloud(sensor: &Sensor, frame: &RawFrame) -> Result<PointCloud> {
    let factors = sensor.factors()?;
    let calibration = sensor.calibration();
    let ranges = correct_ranges(&frame.samples, calibration);

    project_to_world(&ranges, factors, &calibration.position).map_err(|source| {
        ExtractionError::Projection {
            sensor: sensor.name().to_string(),
            source,
        }
    })
}

/// Convert frames from a decoder until end-of-stream or `max_frames`.
pub fn convert_frames<R: Read>(
    sensor: &Sensor,
    decoder: &mut FrameDecoder<R>,
    options: &ConvertOptions,
) -> Result<Vec<FrameCloud>> {
    let limit = options.max_frames.unwrap_or(usize::MAX);
    let mut clouds = Vec::new();

    while clouds.len() < limit {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_truncated() && options.tolerate_truncated => {
                warn!(
                    "Sensor {}: truncated frame after {} frames, stopping ({})",
                    sensor.name(),
                    decoder.frames_read(),
                    e
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let cloud = frame_to_cloud(sensor, &frame)?;
        clouds.push(FrameCloud {
            timestamp_ms: frame.timestamp_ms()?,
            cloud,
        });
    }

    debug!("Sensor {}: converted {} frames", sensor.name(), clouds.len());
    Ok(clouds)
}

/// Convert a sensor log file into one point cloud per frame.
///
/// # Arguments
///
/// * `sensor` - Calibrated sensor the log belongs to
/// * `path` - Path to the binary log
/// * `options` - Frame limit and truncation handling
pub fn convert_log(
    sensor: &Sensor,
    path: &Path,
    options: &ConvertOptions,
) -> Result<Vec<FrameCloud>> {
    let mut decoder = open_log(path)?;
    convert_frames(sensor, &mut decoder, options)
}

/// Convert the first frame of one of a sensor's logs.
fn snapshot_sensor(
    sensor: &Sensor,
    data_dir: &Path,
    log_file_index: usize,
) -> Result<FrameCloud> {
    let path = nth_log_file(&data_dir.join(sensor.name()), log_file_index)?;
    debug!("Sensor {}: reading {}", sensor.name(), path.display());

    let mut decoder = open_log(&path)?;
    let frame = decoder
        .next_frame()?
        .ok_or_else(|| ExtractionError::EmptyLog(path.clone()))?;

    Ok(FrameCloud {
        timestamp_ms: frame.timestamp_ms()?,
        cloud: frame_to_cloud(sensor, &frame)?,
    })
}

/// Build a snapshot map from one frame of every registered sensor.
///
/// Sensors are processed in parallel; a sensor that fails is logged and
/// recorded in [`MapResult::failures`] without affecting the others.
pub fn extract_map(
    registry: &SensorRegistry,
    data_dir: &Path,
    options: &MapOptions,
) -> MapResult {
    let sensors: Vec<&Sensor> = registry.iter().collect();

    let outcomes: Vec<(String, Result<FrameCloud>)> = sensors
        .par_iter()
        .map(|sensor| {
            let outcome = snapshot_sensor(sensor, data_dir, options.log_file_index);
            (sensor.name().to_string(), outcome)
        })
        .collect();

    let mut result = MapResult::default();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(frame) => {
                result.contributions.push((name, frame.cloud.len()));
                result.timestamp_ms = result.timestamp_ms.max(Some(frame.timestamp_ms));
                result.cloud.extend_from(&frame.cloud);
            }
            Err(e) => {
                warn!("Skipping sensor {}: {}", name, e);
                result.failures.push((name, e));
            }
        }
    }

    if let Some(band) = options.band {
        result.cloud = filter_height_band(&result.cloud, band);
    }

    info!(
        "Map built from {} sensors ({} failed): {} points",
        result.contributions.len(),
        result.failures.len(),
        result.cloud.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::{AxisSpec, Orientation, SensorCalibration, SensorType};
    use crate::core::frame::encode_frame;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_PI_2;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn scanner(name: &str, position: [f64; 3]) -> SensorCalibration {
        let axis = AxisSpec {
            min_angle: -FRAC_PI_2,
            max_angle: FRAC_PI_2,
            resolution: 2,
        };
        SensorCalibration {
            name: name.to_string(),
            position: Vector3::from(position),
            orientation: Orientation::default(),
            horizontal: axis,
            vertical: axis,
            radial_distortion: 0.0,
            range_correction_factor: 0.0,
            sensor_type: SensorType::Velodyne,
        }
    }

    fn log_bytes(frames: &[(u64, u16, Vec<i16>)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (seconds, millis, samples) in frames {
            encode_frame(&mut bytes, *seconds, *millis, samples).unwrap();
        }
        bytes
    }

    fn assert_point(cloud: &PointCloud, i: usize, expected: [f64; 3]) {
        let actual = cloud.to_coords()[i];
        for axis in 0..3 {
            assert!(
                (actual[axis] - expected[axis]).abs() < 1e-9,
                "point {}: {:?} vs {:?}",
                i,
                actual,
                expected
            );
        }
    }

    #[test]
    fn test_two_frame_scanner_log() -> Result<()> {
        let sensor = Sensor::new(scanner("v1", [0.0, 0.0, 3000.0]));
        let bytes = log_bytes(&[
            (1000, 1, vec![100, 200, 300, 400]),
            (1000, 101, vec![500, 600, 700, 800]),
        ]);
        let mut decoder = FrameDecoder::new(Cursor::new(bytes));

        let frames = convert_frames(&sensor, &mut decoder, &ConvertOptions::default())?;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp_ms, 1_000_001);
        assert_eq!(frames[1].timestamp_ms, 1_000_101);

        let first = &frames[0].cloud;
        assert_eq!(first.len(), 4);
        // raster order: (v0,h0) (v0,h1) (v1,h0) (v1,h1)
        assert_point(first, 0, [100.0, 0.0, 3000.0]);
        assert_point(first, 1, [200.0, 0.0, 3000.0]);
        assert_point(first, 2, [0.0, 300.0, 3000.0]);
        assert_point(first, 3, [0.0, 0.0, 2600.0]);

        let second = &frames[1].cloud;
        assert_eq!(second.len(), 4);
        assert_point(second, 3, [0.0, 0.0, 2200.0]);
        Ok(())
    }

    #[test]
    fn test_max_frames_limits_conversion() -> Result<()> {
        let sensor = Sensor::new(scanner("v1", [0.0; 3]));
        let bytes = log_bytes(&[(1, 0, vec![1; 4]), (2, 0, vec![1; 4]), (3, 0, vec![1; 4])]);
        let options = ConvertOptions {
            max_frames: Some(2),
            ..ConvertOptions::default()
        };
        let frames = convert_frames(&sensor, &mut FrameDecoder::new(Cursor::new(bytes)), &options)?;
        assert_eq!(frames.len(), 2);
        Ok(())
    }

    #[test]
    fn test_truncated_final_frame_handling() {
        let sensor = Sensor::new(scanner("v1", [0.0; 3]));
        let mut bytes = log_bytes(&[(1, 0, vec![1; 4]), (2, 0, vec![1; 4])]);
        bytes.truncate(bytes.len() - 1);

        let tolerant = convert_frames(
            &sensor,
            &mut FrameDecoder::new(Cursor::new(bytes.clone())),
            &ConvertOptions::default(),
        )
        .unwrap();
        assert_eq!(tolerant.len(), 1);

        let strict = ConvertOptions {
            tolerate_truncated: false,
            ..ConvertOptions::default()
        };
        let err = convert_frames(&sensor, &mut FrameDecoder::new(Cursor::new(bytes)), &strict)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Frame(ref e) if e.is_truncated()));
    }

    #[test]
    fn test_protocol_error_is_surfaced() {
        let sensor = Sensor::new(scanner("v1", [0.0; 3]));
        let mut bytes = log_bytes(&[(1, 0, vec![1; 4])]);
        bytes.push(b'?');

        let err = convert_frames(
            &sensor,
            &mut FrameDecoder::new(Cursor::new(bytes)),
            &ConvertOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ExtractionError::Frame(FrameError::BadMarker(b'?'))));
    }

    #[test]
    fn test_sample_count_mismatch() {
        let sensor = Sensor::new(scanner("v1", [0.0; 3]));
        let frame = RawFrame {
            version: *b"003",
            seconds: *b"0000000001",
            millis: *b"000",
            reserved: [b'0'; 10],
            samples: vec![1, 2, 3],
        };
        let err = frame_to_cloud(&sensor, &frame).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Projection {
                source: ProjectionError::LengthMismatch { ranges: 3, factors: 4 },
                ..
            }
        ));
    }

    #[test]
    fn test_lookup_sensor() {
        let registry: SensorRegistry = std::iter::once(scanner("v1", [0.0; 3])).collect();
        assert!(lookup_sensor(&registry, "v1").is_ok());
        assert!(matches!(
            lookup_sensor(&registry, "v2"),
            Err(ExtractionError::UnknownSensor(ref name)) if name == "v2"
        ));
    }

    #[test]
    fn test_convert_log_from_file() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");
        fs::write(&path, log_bytes(&[(5, 0, vec![10, 10, 10, 10])])).unwrap();

        let sensor = Sensor::new(scanner("v1", [0.0; 3]));
        let frames = convert_log(&sensor, &path, &ConvertOptions::default())?;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ms, 5000);
        Ok(())
    }

    #[test]
    fn test_extract_map_skips_failing_sensors() {
        let dir = TempDir::new().unwrap();
        let registry: SensorRegistry = vec![
            scanner("a", [0.0, 0.0, 4000.0]),
            scanner("b", [1000.0, 0.0, 4000.0]),
            scanner("missing", [0.0; 3]),
            scanner("corrupt", [0.0; 3]),
        ]
        .into_iter()
        .collect();

        for (name, seconds) in [("a", 10u64), ("b", 12u64)] {
            let sensor_dir = dir.path().join(name);
            fs::create_dir_all(&sensor_dir).unwrap();
            fs::write(sensor_dir.join("0001.bin"), log_bytes(&[(seconds, 0, vec![1000; 4])]))
                .unwrap();
        }
        let corrupt_dir = dir.path().join("corrupt");
        fs::create_dir_all(&corrupt_dir).unwrap();
        fs::write(corrupt_dir.join("0001.bin"), b"garbage").unwrap();

        let options = MapOptions {
            log_file_index: 0,
            band: Some(HeightBand::new(2500.0, 3500.0)),
        };
        let map = extract_map(&registry, dir.path(), &options);

        assert_eq!(
            map.contributions,
            vec![("a".to_string(), 4), ("b".to_string(), 4)]
        );
        let failed: Vec<&str> = map.failures.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(failed, vec!["corrupt", "missing"]);
        assert_eq!(map.timestamp_ms, Some(12_000));

        // Only the downward pixel of each sensor lands inside the band
        assert_eq!(map.cloud.len(), 2);
        assert_point(&map.cloud, 0, [0.0, 0.0, 3000.0]);
        assert_point(&map.cloud, 1, [1000.0, 0.0, 3000.0]);
    }
}
