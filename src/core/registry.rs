//! Calibrated sensors with lazily built transform factor tables.
//!
//! The registry owns every sensor's calibration together with its derived
//! table. Tables are built on first use and then shared read-only, so the
//! registry can be handed to parallel workers by reference.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use log::debug;

use super::calibration::{CalibrationTable, SensorCalibration};
use super::transforms::{build_transform_factors, TransformError, TransformFactorTable};

/// One calibrated sensor and its cached transform factors.
#[derive(Debug)]
pub struct Sensor {
    calibration: SensorCalibration,
    factors: OnceLock<Result<TransformFactorTable, TransformError>>,
}

impl Sensor {
    pub fn new(calibration: SensorCalibration) -> Self {
        Self {
            calibration,
            factors: OnceLock::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.calibration.name
    }

    #[inline]
    pub fn calibration(&self) -> &SensorCalibration {
        &self.calibration
    }

    /// Transform factor table, built on the first call.
    ///
    /// A failed build is cached as well and reported on every call.
    pub fn factors(&self) -> Result<&TransformFactorTable, TransformError> {
        self.factors
            .get_or_init(|| {
                debug!(
                    "Building transform factors for {} ({}x{} pixels)",
                    self.calibration.name,
                    self.calibration.horizontal.resolution,
                    self.calibration.vertical.resolution
                );
                build_transform_factors(&self.calibration)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// True once the table has been built (successfully or not).
    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.factors.get().is_some()
    }
}

/// Mapping from sensor name to calibrated sensor.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: BTreeMap<String, Sensor>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor, replacing any previous one of the same name.
    pub fn insert(&mut self, calibration: SensorCalibration) {
        self.sensors
            .insert(calibration.name.clone(), Sensor::new(calibration));
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Sensor> {
        self.sensors.get(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensors in name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, Sensor> {
        self.sensors.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sensors.keys().map(String::as_str)
    }
}

impl From<CalibrationTable> for SensorRegistry {
    fn from(table: CalibrationTable) -> Self {
        table.sensors.into_values().collect()
    }
}

impl FromIterator<SensorCalibration> for SensorRegistry {
    fn from_iter<I: IntoIterator<Item = SensorCalibration>>(iter: I) -> Self {
        let mut registry = SensorRegistry::new();
        for calibration in iter {
            registry.insert(calibration);
        }
        registry
    }
}
