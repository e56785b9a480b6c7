//! Sensor calibration table loading.
//!
//! The calibration table has one row per sensor. This module is the only place
//! that knows the row layout; everything downstream works on
//! [`SensorCalibration`] values.
//!
//! Expected columns (matched by trimmed header name):
//! - `ID` - sensor name
//! - `x [mm]`, `y [mm]`, `z [mm]` - sensor position
//! - `phi_x [deg]`, `phi_y [deg]`, `phi_z [deg]` - roll, pitch, yaw
//! - `min. angle`, `max. angle`, `resolution` - horizontal field of view
//! - `min. angle.1`, `max. angle.1`, `resolution.1` - vertical field of view
//! - `range correction factor`, `Type`
//! - optional `radial distortion`

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord};
use log::{debug, warn};
use nalgebra::Vector3;
use thiserror::Error;

use super::frame::MAX_SAMPLES;
use crate::config::CalibrationConfig;

/// Errors that can occur while loading calibration data.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Malformed calibration for sensor '{sensor}': {reason}")]
    Malformed { sensor: String, reason: String },
}

impl CalibrationError {
    fn malformed(sensor: &str, reason: impl Into<String>) -> Self {
        CalibrationError::Malformed {
            sensor: sensor.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for calibration operations.
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Physical sensor family, which selects the projection model and the
/// range correction curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    /// Panasonic D-Imager time-of-flight camera (pinhole model).
    DImager,
    /// Velodyne-class rotating laser scanner.
    Velodyne,
}

impl SensorType {
    /// Returns true if this sensor is modelled as a pinhole camera.
    #[inline]
    pub fn is_pinhole(self) -> bool {
        matches!(self, SensorType::DImager)
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        if normalized == "dimager" {
            Ok(SensorType::DImager)
        } else if normalized.starts_with("velodyne") {
            Ok(SensorType::Velodyne)
        } else {
            Err(format!("unknown sensor type '{}'", s.trim()))
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::DImager => f.pad("D-Imager"),
            SensorType::Velodyne => f.pad("Velodyne"),
        }
    }
}

/// Sensor orientation as intrinsic rotation angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    /// Rotation around x (`phi_x`).
    pub roll: f64,
    /// Rotation around y (`phi_y`).
    pub pitch: f64,
    /// Rotation around z (`phi_z`).
    pub yaw: f64,
}

/// Angular bounds (radians) and pixel count along one image axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSpec {
    pub min_angle: f64,
    pub max_angle: f64,
    pub resolution: usize,
}

impl AxisSpec {
    /// Total angular extent of this axis.
    #[inline]
    pub fn field_of_view(&self) -> f64 {
        self.max_angle - self.min_angle
    }

    /// Angle covered by one pixel.
    #[inline]
    pub fn step(&self) -> f64 {
        self.field_of_view() / self.resolution as f64
    }
}

/// Immutable calibration record of one physical sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorCalibration {
    pub name: String,
    /// Position in world coordinates (mm).
    pub position: Vector3<f64>,
    pub orientation: Orientation,
    pub horizontal: AxisSpec,
    pub vertical: AxisSpec,
    pub radial_distortion: f64,
    /// Linear range adjustment in percent per mm beyond 3000 mm.
    pub range_correction_factor: f64,
    pub sensor_type: SensorType,
}

impl SensorCalibration {
    /// Number of pixels (range samples) per frame.
    ///
    /// `None` if the resolutions multiply past what a single frame can carry.
    #[inline]
    pub fn pixel_count(&self) -> Option<usize> {
        self.horizontal
            .resolution
            .checked_mul(self.vertical.resolution)
            .filter(|&pixels| pixels <= MAX_SAMPLES)
    }

    /// Checks the invariants every downstream component relies on.
    pub fn validate(&self) -> Result<()> {
        if self.horizontal.resolution == 0 || self.vertical.resolution == 0 {
            return Err(CalibrationError::malformed(
                &self.name,
                format!(
                    "resolution must be positive, got {}x{}",
                    self.horizontal.resolution, self.vertical.resolution
                ),
            ));
        }
        if self.pixel_count().is_none() {
            return Err(CalibrationError::malformed(
                &self.name,
                format!(
                    "resolution {}x{} exceeds the {} samples a frame can hold",
                    self.horizontal.resolution, self.vertical.resolution, MAX_SAMPLES
                ),
            ));
        }

        for (axis, spec) in [
            ("horizontal", &self.horizontal),
            ("vertical", &self.vertical),
        ] {
            if !spec.min_angle.is_finite() || !spec.max_angle.is_finite() {
                return Err(CalibrationError::malformed(
                    &self.name,
                    format!("{} angles must be finite", axis),
                ));
            }
            if spec.min_angle >= spec.max_angle {
                return Err(CalibrationError::malformed(
                    &self.name,
                    format!(
                        "{} min angle {:.4} rad is not below max angle {:.4} rad",
                        axis, spec.min_angle, spec.max_angle
                    ),
                ));
            }
        }

        let scalars = [
            self.position.x,
            self.position.y,
            self.position.z,
            self.orientation.roll,
            self.orientation.pitch,
            self.orientation.yaw,
            self.radial_distortion,
            self.range_correction_factor,
        ];
        if scalars.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::malformed(
                &self.name,
                "position, orientation and correction values must be finite",
            ));
        }

        Ok(())
    }
}

/// Loaded calibration table.
///
/// Rows that fail validation do not abort the load; they are reported in
/// `rejected` so callers can skip those sensors and continue with the rest.
#[derive(Debug, Default)]
pub struct CalibrationTable {
    pub sensors: BTreeMap<String, SensorCalibration>,
    pub rejected: Vec<(String, CalibrationError)>,
}

impl CalibrationTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

const COL_ID: &str = "ID";
const COL_X: &str = "x [mm]";
const COL_Y: &str = "y [mm]";
const COL_Z: &str = "z [mm]";
const COL_PHI_X: &str = "phi_x [deg]";
const COL_PHI_Y: &str = "phi_y [deg]";
const COL_PHI_Z: &str = "phi_z [deg]";
const COL_H_MIN: &str = "min. angle";
const COL_H_MAX: &str = "max. angle";
const COL_H_RES: &str = "resolution";
const COL_V_MIN: &str = "min. angle.1";
const COL_V_MAX: &str = "max. angle.1";
const COL_V_RES: &str = "resolution.1";
const COL_CORRECTION: &str = "range correction factor";
const COL_TYPE: &str = "Type";
const COL_DISTORTION: &str = "radial distortion";

const REQUIRED_COLUMNS: [&str; 15] = [
    COL_ID,
    COL_X,
    COL_Y,
    COL_Z,
    COL_PHI_X,
    COL_PHI_Y,
    COL_PHI_Z,
    COL_H_MIN,
    COL_H_MAX,
    COL_H_RES,
    COL_V_MIN,
    COL_V_MAX,
    COL_V_RES,
    COL_CORRECTION,
    COL_TYPE,
];

/// Header name lookup that tolerates duplicated names.
///
/// `"name.N"` resolves to an exact header of that name, or else to the N-th
/// repeat of `"name"`.
struct ColumnIndex {
    positions: HashMap<String, Vec<usize>>,
}

impl ColumnIndex {
    fn new(headers: &StringRecord) -> Self {
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, name) in headers.iter().enumerate() {
            positions.entry(name.trim().to_string()).or_default().push(i);
        }
        Self { positions }
    }

    fn find(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.positions.get(name).and_then(|p| p.first()) {
            return Some(*idx);
        }

        let (base, suffix) = name.rsplit_once('.')?;
        let repeat: usize = suffix.parse().ok()?;
        self.positions.get(base).and_then(|p| p.get(repeat)).copied()
    }
}

/// Resolved column positions for the calibration layout.
struct Columns {
    required: HashMap<&'static str, usize>,
    distortion: Option<usize>,
}

impl Columns {
    fn resolve(index: &ColumnIndex) -> Result<Self> {
        let mut required = HashMap::with_capacity(REQUIRED_COLUMNS.len());
        for name in REQUIRED_COLUMNS {
            let idx = index
                .find(name)
                .ok_or_else(|| CalibrationError::MissingColumn(name.to_string()))?;
            required.insert(name, idx);
        }

        Ok(Self {
            required,
            distortion: index.find(COL_DISTORTION),
        })
    }

    fn text<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.required
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }
}

fn parse_number(sensor: &str, column: &str, text: &str) -> Result<f64> {
    text.parse::<f64>().map_err(|_| {
        CalibrationError::malformed(
            sensor,
            format!("column '{}' is not a number: '{}'", column, text),
        )
    })
}

fn parse_resolution(sensor: &str, column: &str, text: &str) -> Result<usize> {
    let value = parse_number(sensor, column, text)?.trunc();
    if !value.is_finite() || value < 1.0 {
        return Err(CalibrationError::malformed(
            sensor,
            format!("column '{}' must be a positive integer, got '{}'", column, text),
        ));
    }
    Ok(value as usize)
}

fn parse_row(
    name: &str,
    record: &StringRecord,
    columns: &Columns,
    config: &CalibrationConfig,
) -> Result<SensorCalibration> {
    let number = |col: &str| parse_number(name, col, columns.text(record, col));
    let degrees = |col: &str| number(col).map(f64::to_radians);
    let resolution = |col: &str| parse_resolution(name, col, columns.text(record, col));

    let sensor_type: SensorType = columns
        .text(record, COL_TYPE)
        .parse()
        .map_err(|reason: String| CalibrationError::malformed(name, reason))?;

    let correction_text = columns.text(record, COL_CORRECTION);
    let range_correction_factor = if correction_text.is_empty() {
        0.0
    } else {
        parse_number(name, COL_CORRECTION, correction_text)?
    };

    let distortion_text = columns
        .distortion
        .and_then(|i| record.get(i))
        .map(str::trim)
        .unwrap_or("");
    let radial_distortion = if !distortion_text.is_empty() {
        parse_number(name, COL_DISTORTION, distortion_text)?
    } else if sensor_type.is_pinhole() {
        config.dimager_radial_distortion
    } else {
        0.0
    };

    let calibration = SensorCalibration {
        name: name.to_string(),
        position: Vector3::new(number(COL_X)?, number(COL_Y)?, number(COL_Z)?),
        orientation: Orientation {
            roll: degrees(COL_PHI_X)?,
            pitch: degrees(COL_PHI_Y)?,
            yaw: degrees(COL_PHI_Z)?,
        },
        horizontal: AxisSpec {
            min_angle: degrees(COL_H_MIN)?,
            max_angle: degrees(COL_H_MAX)?,
            resolution: resolution(COL_H_RES)?,
        },
        vertical: AxisSpec {
            min_angle: degrees(COL_V_MIN)?,
            max_angle: degrees(COL_V_MAX)?,
            resolution: resolution(COL_V_RES)?,
        },
        radial_distortion,
        range_correction_factor,
        sensor_type,
    };

    calibration.validate()?;
    Ok(calibration)
}

/// Read a calibration table from any CSV source.
///
/// # Errors
///
/// Returns an error if the source cannot be read or a required column is
/// absent. Per-sensor problems are collected in [`CalibrationTable::rejected`].
pub fn read_calibration<R: Read>(
    reader: R,
    config: &CalibrationConfig,
) -> Result<CalibrationTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = reader.records();

    // Skip title rows above the header
    for _ in 0..config.header_row {
        if records.next().transpose()?.is_none() {
            return Err(CalibrationError::MissingColumn(COL_ID.to_string()));
        }
    }

    let headers = records
        .next()
        .transpose()?
        .ok_or_else(|| CalibrationError::MissingColumn(COL_ID.to_string()))?;
    let columns = Columns::resolve(&ColumnIndex::new(&headers))?;

    let mut table = CalibrationTable::default();
    let max_rows = config.max_sensors.unwrap_or(usize::MAX);

    for result in records.take(max_rows) {
        let record = result?;
        let name = columns.text(&record, COL_ID);
        if name.is_empty() {
            continue;
        }

        match parse_row(name, &record, &columns, config) {
            Ok(calibration) => {
                debug!(
                    "Loaded sensor {} ({}, {}x{})",
                    name,
                    calibration.sensor_type,
                    calibration.horizontal.resolution,
                    calibration.vertical.resolution
                );
                if table.sensors.insert(name.to_string(), calibration).is_some() {
                    warn!("Duplicate calibration row for sensor {}, keeping the last one", name);
                }
            }
            Err(e) => {
                warn!("Skipping sensor {}: {}", name, e);
                table.rejected.push((name.to_string(), e));
            }
        }
    }

    Ok(table)
}

/// Load the calibration table from a CSV file.
///
/// # Arguments
///
/// * `path` - Path to the calibration CSV
/// * `config` - Calibration layout options
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks required columns.
pub fn load_calibration_csv<P: AsRef<Path>>(
    path: P,
    config: &CalibrationConfig,
) -> Result<CalibrationTable> {
    let file = File::open(path.as_ref())?;
    read_calibration(BufReader::new(file), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "ID,x [mm],y [mm],z [mm],phi_x [deg],phi_y [deg],phi_z [deg],\
min. angle,max. angle,resolution,min. angle.1,max. angle.1,resolution.1,\
range correction factor,Type";

    fn table_from(text: &str) -> Result<CalibrationTable> {
        read_calibration(text.as_bytes(), &CalibrationConfig::default())
    }

    #[test]
    fn test_sensor_type_parsing() {
        assert_eq!("D-IMager".parse::<SensorType>(), Ok(SensorType::DImager));
        assert_eq!("DImager".parse::<SensorType>(), Ok(SensorType::DImager));
        assert_eq!(" d-imager ".parse::<SensorType>(), Ok(SensorType::DImager));
        assert_eq!("Velodyne".parse::<SensorType>(), Ok(SensorType::Velodyne));
        assert_eq!("Velodyne HDL-32E".parse::<SensorType>(), Ok(SensorType::Velodyne));
        assert!("Kinect".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_load_converts_degrees_and_resolutions() -> Result<()> {
        let text = format!(
            "{}\n1001,100,200,3000,180,0,90,-30,30,160,-22.5,22.5,120,0.5,D-IMager\n",
            HEADER
        );
        let table = table_from(&text)?;
        assert_eq!(table.len(), 1);
        assert!(table.rejected.is_empty());

        let calib = &table.sensors["1001"];
        assert_eq!(calib.position, Vector3::new(100.0, 200.0, 3000.0));
        assert!((calib.orientation.roll - std::f64::consts::PI).abs() < 1e-12);
        assert!((calib.orientation.yaw - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((calib.horizontal.max_angle - 30f64.to_radians()).abs() < 1e-12);
        assert_eq!(calib.horizontal.resolution, 160);
        assert_eq!(calib.vertical.resolution, 120);
        assert_eq!(calib.pixel_count(), Some(19200));
        assert_eq!(calib.range_correction_factor, 0.5);
        assert_eq!(calib.sensor_type, SensorType::DImager);
        assert_eq!(calib.radial_distortion, -2.23197e-5);
        Ok(())
    }

    #[test]
    fn test_velodyne_has_no_default_distortion() -> Result<()> {
        let text = format!(
            "{}\nv1,0,0,2000,0,0,0,-180,180,2000,-30,10,32,0,Velodyne\n",
            HEADER
        );
        let table = table_from(&text)?;
        let calib = &table.sensors["v1"];
        assert_eq!(calib.sensor_type, SensorType::Velodyne);
        assert_eq!(calib.radial_distortion, 0.0);
        Ok(())
    }

    #[test]
    fn test_explicit_distortion_column() -> Result<()> {
        let text = format!(
            "{},radial distortion\n1001,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager,-1e-4\n",
            HEADER
        );
        let table = table_from(&text)?;
        assert_eq!(table.sensors["1001"].radial_distortion, -1e-4);
        Ok(())
    }

    #[test]
    fn test_missing_column_fails_whole_table() {
        let text = "ID,x [mm],y [mm]\n1001,0,0\n";
        match table_from(text) {
            Err(CalibrationError::MissingColumn(name)) => assert_eq!(name, "z [mm]"),
            other => panic!("Expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_non_positive_resolution_rejects_only_that_sensor() -> Result<()> {
        let text = format!(
            "{}\nbad,0,0,0,0,0,0,-30,30,0,-30,30,4,0,D-IMager\n\
good,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager\n",
            HEADER
        );
        let table = table_from(&text)?;
        assert_eq!(table.len(), 1);
        assert!(table.sensors.contains_key("good"));
        assert_eq!(table.rejected.len(), 1);
        assert_eq!(table.rejected[0].0, "bad");
        assert!(matches!(
            table.rejected[0].1,
            CalibrationError::Malformed { .. }
        ));
        Ok(())
    }

    #[test]
    fn test_oversized_resolution_is_malformed() -> Result<()> {
        let text = format!(
            "{}\nhuge,0,0,0,0,0,0,-180,180,1e12,-30,10,1e12,0,Velodyne\n\
wide,0,0,0,0,0,0,-180,180,100000,-30,10,100000,0,Velodyne\n\
ok,0,0,0,0,0,0,-180,180,2000,-30,10,32,0,Velodyne\n",
            HEADER
        );
        let table = table_from(&text)?;
        assert_eq!(table.sensors.keys().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(table.rejected.len(), 2);
        for (_, e) in &table.rejected {
            assert!(matches!(e, CalibrationError::Malformed { .. }));
        }
        assert_eq!(table.sensors["ok"].pixel_count(), Some(64_000));
        Ok(())
    }

    #[test]
    fn test_unordered_angles_and_unknown_type_are_malformed() -> Result<()> {
        let text = format!(
            "{}\nflipped,0,0,0,0,0,0,30,-30,4,-30,30,4,0,D-IMager\n\
kinect,0,0,0,0,0,0,-30,30,4,-30,30,4,0,Kinect\n\
text,abc,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager\n",
            HEADER
        );
        let table = table_from(&text)?;
        assert!(table.is_empty());
        assert_eq!(table.rejected.len(), 3);
        Ok(())
    }

    #[test]
    fn test_duplicated_header_names_and_title_row() -> Result<()> {
        let text = "sensor,position,,,orientation,,,horizontal,,,vertical,,,,\n\
ID,x [mm],y [mm],z [mm],phi_x [deg],phi_y [deg],phi_z [deg],\
min. angle,max. angle,resolution,min. angle,max. angle,resolution,\
range correction factor,Type\n\
1001,0,0,0,0,0,0,-30,30,8,-20,20,6,,D-IMager\n";
        let config = CalibrationConfig {
            header_row: 1,
            ..CalibrationConfig::default()
        };
        let table = read_calibration(text.as_bytes(), &config)?;
        let calib = &table.sensors["1001"];
        assert_eq!(calib.horizontal.resolution, 8);
        assert_eq!(calib.vertical.resolution, 6);
        assert!((calib.vertical.max_angle - 20f64.to_radians()).abs() < 1e-12);
        assert_eq!(calib.range_correction_factor, 0.0);
        Ok(())
    }

    #[test]
    fn test_max_sensors_and_blank_rows() -> Result<()> {
        let text = format!(
            "{}\na,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager\n\
,,,,,,,,,,,,,,\n\
b,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager\n\
c,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager\n",
            HEADER
        );
        let config = CalibrationConfig {
            max_sensors: Some(3),
            ..CalibrationConfig::default()
        };
        let table = read_calibration(text.as_bytes(), &config)?;
        assert_eq!(table.sensors.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_load_calibration_csv_from_file() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "1001,0,0,0,0,0,0,-30,30,4,-30,30,4,0,D-IMager").unwrap();
        file.flush().unwrap();

        let table = load_calibration_csv(file.path(), &CalibrationConfig::default())?;
        assert_eq!(table.len(), 1);
        Ok(())
    }
}
