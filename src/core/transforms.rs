//! Per-pixel transform factors and range-to-world projection.
//!
//! A transform factor is the unit direction, in world orientation, along
//! which a pixel measures range. Tables are computed once per sensor and
//! reused for every frame; the per-pixel work is parallelized using Rayon.

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use thiserror::Error;

use super::calibration::{SensorCalibration, SensorType};
use super::loaders::PointCloud;

/// Errors that can occur while building transform factors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Invalid calibration: {0}")]
    Calibration(String),

    #[error("Degenerate direction for pixel {index} of sensor '{sensor}'")]
    DegeneratePixel { sensor: String, index: usize },
}

/// Errors that can occur while projecting ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Range count {ranges} does not match transform factor count {factors}")]
    LengthMismatch { ranges: usize, factors: usize },
}

/// Dense row-major table of unit directions, one per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformFactorTable {
    horizontal_resolution: usize,
    vertical_resolution: usize,
    directions: Vec<Vector3<f64>>,
}

impl TransformFactorTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    #[inline]
    pub fn horizontal_resolution(&self) -> usize {
        self.horizontal_resolution
    }

    #[inline]
    pub fn vertical_resolution(&self) -> usize {
        self.vertical_resolution
    }

    /// Direction of pixel `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Vector3<f64>> {
        self.directions.get(index)
    }

    #[inline]
    pub fn directions(&self) -> &[Vector3<f64>] {
        &self.directions
    }
}

/// Build the transform factor table for one sensor.
///
/// Dispatches on the sensor type: D-Imager sensors use the pinhole model,
/// Velodyne sensors the rotating scanner model.
///
/// # Errors
///
/// Returns an error if the calibration violates its invariants or any pixel
/// direction is not finite.
pub fn build_transform_factors(
    calibration: &SensorCalibration,
) -> Result<TransformFactorTable, TransformError> {
    calibration
        .validate()
        .map_err(|e| TransformError::Calibration(e.to_string()))?;

    let directions = match calibration.sensor_type {
        SensorType::DImager => pinhole_factors(calibration),
        SensorType::Velodyne => rotating_scanner_factors(calibration),
    };

    if let Some(index) = directions
        .iter()
        .position(|d| !(d.x.is_finite() && d.y.is_finite() && d.z.is_finite()))
    {
        return Err(TransformError::DegeneratePixel {
            sensor: calibration.name.clone(),
            index,
        });
    }

    Ok(TransformFactorTable {
        horizontal_resolution: calibration.horizontal.resolution,
        vertical_resolution: calibration.vertical.resolution,
        directions,
    })
}

/// World-to-sensor rotation for yaw (z), pitch (y), roll (x) applied as
/// intrinsic rotations in that order.
pub fn world_to_sensor_rotation(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    let (sx, cx) = roll.sin_cos();
    let (sy, cy) = pitch.sin_cos();
    let (sz, cz) = yaw.sin_cos();

    Matrix3::new(
        cy * cz,
        cy * sz,
        -sy,
        sx * sy * cz - cx * sz,
        sx * sy * sz + cx * cz,
        cy * sx,
        cx * sy * cz + sx * sz,
        cx * sy * sz - sx * cz,
        cy * cx,
    )
}

/// Image-plane offsets of pixel `index` from the image center.
///
/// Rows count down from the top, so the vertical offset decreases as the
/// row grows. For even widths the horizontal offset runs from
/// `-(w/2 - 1)` to `w/2`, the recorded calibration convention. Odd widths are
/// centred instead, so the middle column (and a 1x1 sensor) looks straight
/// along the optical axis.
#[inline]
pub fn pinhole_pixel_offset(index: usize, horizontal: usize, vertical: usize) -> (f64, f64) {
    let row = (index / horizontal) as i64;
    let col = (index % horizontal) as i64;
    let ind_v = (vertical / 2) as i64 - row;
    let ind_h = col - ((horizontal as i64 - 1) / 2);
    (ind_v as f64, ind_h as f64)
}

/// Pinhole (time-of-flight camera) directions.
///
/// The effective focal length comes from the horizontal field of view and
/// is shrunk by the radial distortion at the image border. Each camera ray
/// is rotated back into world orientation and flipped for the sensor's
/// 180 degree mounting (x and z inverted).
///
/// Expects a validated calibration; resolutions too large for a frame yield
/// an empty table.
pub fn pinhole_factors(calibration: &SensorCalibration) -> Vec<Vector3<f64>> {
    let h_res = calibration.horizontal.resolution;
    let v_res = calibration.vertical.resolution;
    let pixels = calibration.pixel_count().unwrap_or(0);
    let distortion = calibration.radial_distortion;
    let o = &calibration.orientation;

    let sensor_to_world = world_to_sensor_rotation(o.roll, o.pitch, o.yaw).transpose();
    let mounting = Vector3::new(-1.0, 1.0, -1.0);

    let width = h_res as f64;
    let focus = width / 2.0 / (calibration.horizontal.field_of_view() / 2.0).tan();
    let focus = focus / (1.0 + distortion * width * width / 4.0);

    (0..pixels)
        .into_par_iter()
        .map(|index| {
            let (ind_v, ind_h) = pinhole_pixel_offset(index, h_res, v_res);
            let delta = 1.0 + distortion * (ind_v * ind_v + ind_h * ind_h);
            let depth = focus * delta;

            let norm = (depth * depth + ind_v * ind_v + ind_h * ind_h).sqrt();
            let camera = Vector3::new(ind_v, ind_h, depth) / norm;

            (sensor_to_world * camera).component_mul(&mounting)
        })
        .collect()
}

/// Rotating laser scanner directions.
///
/// The zero position of the scanner faces straight down. Each pixel rotates
/// `[0, 0, -1]` by minus its vertical deflection around y, then by the
/// horizontal angle (offset by the mounting roll) around x, minus the pitch
/// around y and the yaw around z. The closed form below is the expanded
/// product `Rz(yaw) Ry(-pitch) Rx(h) Ry(-deflection)`.
///
/// Expects a validated calibration; resolutions too large for a frame yield
/// an empty table.
pub fn rotating_scanner_factors(calibration: &SensorCalibration) -> Vec<Vector3<f64>> {
    let h = calibration.horizontal;
    let v = calibration.vertical;
    let o = calibration.orientation;
    let pixels = calibration.pixel_count().unwrap_or(0);

    let h_step = h.step();
    let v_step = v.step();

    let (sy, cy) = o.pitch.sin_cos();
    let (sz, cz) = o.yaw.sin_cos();

    (0..pixels)
        .into_par_iter()
        .map(|index| {
            let ind_v = index / h.resolution;
            let ind_h = index % h.resolution;

            let deflection = v.max_angle - ind_v as f64 * v_step;
            let x_rot = h.max_angle - ind_h as f64 * h_step + o.roll;

            let (sd, cd) = deflection.sin_cos();
            let (sx, cx) = x_rot.sin_cos();
            let cx_sy = cx * sy;

            Vector3::new(
                sd * cy * cz + cd * (-sx * sz + cz * cx_sy),
                sd * cy * sz + cd * (sx * cz + sz * cx_sy),
                sd * sy - cd * cx * cy,
            )
        })
        .collect()
}

/// Convert corrected ranges to world points.
///
/// Computes `position + range[i] * direction[i]` for every pixel, keeping
/// pixel order. No filtering is applied.
///
/// # Errors
///
/// Returns [`ProjectionError::LengthMismatch`] if the number of ranges does
/// not equal the number of transform factors.
pub fn project_to_world(
    ranges: &[f64],
    table: &TransformFactorTable,
    position: &Vector3<f64>,
) -> Result<PointCloud, ProjectionError> {
    if ranges.len() != table.len() {
        return Err(ProjectionError::LengthMismatch {
            ranges: ranges.len(),
            factors: table.len(),
        });
    }

    let mut cloud = PointCloud::with_capacity(ranges.len());
    for (&range, direction) in ranges.iter().zip(table.directions()) {
        let point = position + direction * range;
        cloud.push(point.x, point.y, point.z);
    }

    Ok(cloud)
}
