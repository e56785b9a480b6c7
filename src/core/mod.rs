//! Core data types and I/O operations.

pub mod calibration;
pub mod frame;
pub mod loaders;
pub mod registry;
pub mod transforms;
pub mod writers;

pub use calibration::{load_calibration_csv, CalibrationTable, SensorCalibration, SensorType};
pub use frame::{FrameDecoder, FrameError, RawFrame};
pub use loaders::PointCloud;
pub use registry::{Sensor, SensorRegistry};
pub use transforms::{build_transform_factors, project_to_world, TransformFactorTable};
pub use writers::{write_cartesian_csv, write_ply, write_point_cloud, OutputFormat, WriteError};
