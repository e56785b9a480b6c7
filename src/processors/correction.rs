//! Range correction of raw samples.
//!
//! Correction runs in two stages, in this order:
//! 1. a device curve (D-Imager only, pass-through for other sensors)
//! 2. the calibration's linear adjustment for ranges beyond 3000 mm

use rayon::prelude::*;

use crate::core::calibration::{SensorCalibration, SensorType};

/// Ranges at or below this value are untouched by the linear adjustment (mm).
pub const LINEAR_CORRECTION_START: f64 = 3000.0;

/// Empirical D-Imager range correction.
///
/// Four segments with breakpoints at 3200, 4750 and 6500 mm. The
/// coefficients are fitted values and must stay as they are.
#[inline]
pub fn dimager_correction(raw: f64) -> f64 {
    if raw < 3200.0 {
        raw - raw * 120.0 / 3200.0
    } else if raw < 4750.0 {
        raw - (120.0 - (raw - 3200.0) * 30.0 / 1550.0)
    } else if raw < 6500.0 {
        raw - (30.0 + (raw - 4750.0) * 350.0 / 1750.0)
    } else {
        raw - (350.0 - (raw - 6500.0) * 150.0 / 1500.0)
    }
}

/// Linear adjustment of `factor` percent per mm beyond 3000 mm.
#[inline]
pub fn apply_linear_correction(value: f64, factor: f64) -> f64 {
    if factor != 0.0 && value > LINEAR_CORRECTION_START {
        value + factor / 100.0 * (value - LINEAR_CORRECTION_START)
    } else {
        value
    }
}

/// Device curve for one sample, selected by sensor type.
#[inline]
pub fn device_correction(sensor_type: SensorType, raw: f64) -> f64 {
    match sensor_type {
        SensorType::DImager => dimager_correction(raw),
        SensorType::Velodyne => raw,
    }
}

/// Correct a frame of raw samples.
///
/// Returns ranges in mm, one per input sample, in the same order.
pub fn correct_ranges(raw: &[i16], calibration: &SensorCalibration) -> Vec<f64> {
    let sensor_type = calibration.sensor_type;
    let factor = calibration.range_correction_factor;

    raw.par_iter()
        .map(|&sample| {
            let corrected = device_correction(sensor_type, f64::from(sample));
            apply_linear_correction(corrected, factor)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::{AxisSpec, Orientation};
    use nalgebra::Vector3;

    fn calibration(sensor_type: SensorType, factor: f64) -> SensorCalibration {
        let axis = AxisSpec {
            min_angle: -0.5,
            max_angle: 0.5,
            resolution: 2,
        };
        SensorCalibration {
            name: "s".to_string(),
            position: Vector3::zeros(),
            orientation: Orientation::default(),
            horizontal: axis,
            vertical: axis,
            radial_distortion: 0.0,
            range_correction_factor: factor,
            sensor_type,
        }
    }

    #[test]
    fn test_dimager_curve_values() {
        assert!((dimager_correction(0.0) - 0.0).abs() < 1e-9);
        assert!((dimager_correction(1600.0) - 1540.0).abs() < 1e-9);
        assert!((dimager_correction(3200.0) - 3080.0).abs() < 1e-9);
        assert!((dimager_correction(4750.0) - 4720.0).abs() < 1e-9);
        assert!((dimager_correction(6500.0) - 6150.0).abs() < 1e-9);
        assert!((dimager_correction(8000.0) - 7800.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimager_curve_continuous_at_3200() {
        let below = 3200.0 - 3200.0 * 120.0 / 3200.0;
        let at = dimager_correction(3200.0);
        let just_below = dimager_correction(3200.0 - 1e-9);
        assert!((below - at).abs() < 1e-6);
        assert!((just_below - at).abs() < 1e-6);
    }

    #[test]
    fn test_linear_correction() {
        assert_eq!(apply_linear_correction(3000.0, 10.0), 3000.0);
        assert!((apply_linear_correction(3100.0, 10.0) - 3110.0).abs() < 1e-9);
        assert_eq!(apply_linear_correction(2500.0, 10.0), 2500.0);
        assert_eq!(apply_linear_correction(5000.0, 0.0), 5000.0);
        assert!((apply_linear_correction(4000.0, -5.0) - 3950.0).abs() < 1e-9);
    }

    #[test]
    fn test_velodyne_passes_through() {
        let calib = calibration(SensorType::Velodyne, 0.0);
        assert_eq!(
            correct_ranges(&[0, 1500, 3200, -7], &calib),
            vec![0.0, 1500.0, 3200.0, -7.0]
        );
    }

    #[test]
    fn test_linear_stage_runs_on_device_output() {
        // 3200 raw -> 3080 corrected -> 3080 + 0.1 * 80
        let calib = calibration(SensorType::DImager, 10.0);
        let corrected = correct_ranges(&[3200, 3100], &calib);
        assert!((corrected[0] - 3088.0).abs() < 1e-9);
        // 3100 raw -> 2983.75, below the linear threshold
        assert!((corrected[1] - 2983.75).abs() < 1e-9);
    }

    #[test]
    fn test_velodyne_linear_adjustment() {
        let calib = calibration(SensorType::Velodyne, 10.0);
        assert_eq!(correct_ranges(&[3000, 3100], &calib), vec![3000.0, 3110.0]);
    }
}
