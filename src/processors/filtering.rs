//! Point cloud post-processing applied by callers of the projector.

use rayon::prelude::*;

use crate::core::loaders::PointCloud;

/// Open height interval `(min, max)` in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightBand {
    pub min: f64,
    pub max: f64,
}

impl HeightBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True if `z` lies strictly inside the band.
    #[inline]
    pub fn contains(&self, z: f64) -> bool {
        z > self.min && z < self.max
    }
}

/// Keep only the points whose height lies strictly inside `band`.
///
/// Point order is preserved.
pub fn filter_height_band(cloud: &PointCloud, band: HeightBand) -> PointCloud {
    let keep: Vec<usize> = cloud
        .z
        .par_iter()
        .enumerate()
        .filter(|(_, z)| band.contains(**z))
        .map(|(i, _)| i)
        .collect();

    let mut filtered = PointCloud::with_capacity(keep.len());
    for i in keep {
        filtered.push(cloud.x[i], cloud.y[i], cloud.z[i]);
    }
    filtered
}

/// Apply regular stride subsampling to point cloud.
///
/// Keeps every Nth point where N is the stride value.
/// If stride <= 1, returns a clone of the original cloud.
pub fn apply_stride(cloud: &PointCloud, stride: usize) -> PointCloud {
    if stride <= 1 {
        return cloud.clone();
    }

    let mut strided = PointCloud::with_capacity(cloud.len().div_ceil(stride));
    for i in (0..cloud.len()).step_by(stride) {
        strided.push(cloud.x[i], cloud.y[i], cloud.z[i]);
    }
    strided
}

/// Concatenate point clouds in the given order.
pub fn combine_clouds<'a, I>(clouds: I) -> PointCloud
where
    I: IntoIterator<Item = &'a PointCloud>,
{
    let mut combined = PointCloud::new();
    for cloud in clouds {
        combined.extend_from(cloud);
    }
    combined
}
