//! Data processing modules.

pub mod correction;
pub mod extraction;
pub mod filtering;

// Re-export key types for convenience
pub use correction::{apply_linear_correction, correct_ranges, dimager_correction};
pub use extraction::{
    convert_frames, convert_log, extract_map, frame_to_cloud, lookup_sensor, ConvertOptions,
    ExtractionError, FrameCloud, MapOptions, MapResult,
};
pub use filtering::{apply_stride, combine_clouds, filter_height_band, HeightBand};
