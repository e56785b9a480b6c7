//! Point cloud container and sensor log loading.
//!
//! Logs are stored one directory per sensor:
//!
//! ```text
//! <data_dir>/<sensor name>/<log file>
//! ```

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::frame::FrameDecoder;

/// Errors that can occur while locating or opening logs.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No log files in {0}")]
    NoLogFiles(PathBuf),

    #[error("Log index {index} out of range, {dir} has {count} files")]
    IndexOutOfRange {
        dir: PathBuf,
        index: usize,
        count: usize,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Container for 3D point cloud data in world coordinates (mm).
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f64>,
    /// Y coordinates of all points.
    pub y: Vec<f64>,
    /// Z coordinates of all points.
    pub z: Vec<f64>,
}

impl PointCloud {
    /// Creates a new empty point cloud.
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
        }
    }

    /// Creates a new point cloud from coordinate vectors.
    pub fn from_xyz(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        debug_assert!(x.len() == y.len() && y.len() == z.len());
        Self { x, y, z }
    }

    /// Creates a new point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f64; 3]> {
        (0..self.len())
            .map(|i| [self.x[i], self.y[i], self.z[i]])
            .collect()
    }

    /// Adds a point to the cloud.
    #[inline]
    pub fn push(&mut self, x: f64, y: f64, z: f64) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
    }

    /// Appends all points of `other`, keeping their order.
    pub fn extend_from(&mut self, other: &PointCloud) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// List the log files in one sensor directory, sorted by name.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or holds no files.
pub fn list_log_files(sensor_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(sensor_dir).map_err(|source| LoaderError::Io {
        path: sensor_dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();

    if files.is_empty() {
        return Err(LoaderError::NoLogFiles(sensor_dir.to_path_buf()));
    }

    files.sort();
    Ok(files)
}

/// Pick the `index`-th log file (sorted by name) of a sensor.
pub fn nth_log_file(sensor_dir: &Path, index: usize) -> Result<PathBuf> {
    let files = list_log_files(sensor_dir)?;
    let count = files.len();
    files
        .into_iter()
        .nth(index)
        .ok_or_else(|| LoaderError::IndexOutOfRange {
            dir: sensor_dir.to_path_buf(),
            index,
            count,
        })
}

/// Open a log file for sequential frame decoding.
pub fn open_log(path: &Path) -> Result<FrameDecoder<BufReader<File>>> {
    let file = File::open(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FrameDecoder::new(BufReader::with_capacity(64 * 1024, file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::encode_frame;
    use tempfile::TempDir;

    #[test]
    fn test_point_cloud_operations() {
        let mut cloud = PointCloud::new();
        assert!(cloud.is_empty());

        cloud.push(1.0, 2.0, 3.0);
        cloud.push(4.0, 5.0, 6.0);

        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.to_coords(), vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

        let mut other = PointCloud::from_xyz(vec![7.0], vec![8.0], vec![9.0]);
        other.extend_from(&cloud);
        assert_eq!(other.x, vec![7.0, 1.0, 4.0]);
    }

    #[test]
    fn test_list_log_files_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["b.bin", "a.bin", "c.bin"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_log_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.bin", "b.bin", "c.bin"]);

        assert!(nth_log_file(dir.path(), 1).unwrap().ends_with("b.bin"));
        assert!(matches!(
            nth_log_file(dir.path(), 3),
            Err(LoaderError::IndexOutOfRange { count: 3, .. })
        ));
    }

    #[test]
    fn test_empty_sensor_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            list_log_files(dir.path()),
            Err(LoaderError::NoLogFiles(_))
        ));
        assert!(matches!(
            list_log_files(&dir.path().join("missing")),
            Err(LoaderError::Io { .. })
        ));
    }

    #[test]
    fn test_open_log_decodes_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");
        let mut bytes = Vec::new();
        encode_frame(&mut bytes, 100, 5, &[1, 2, 3]).unwrap();
        encode_frame(&mut bytes, 101, 5, &[4, 5, 6]).unwrap();
        fs::write(&path, bytes).unwrap();

        let frames: Vec<_> = open_log(&path)
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].samples, vec![4, 5, 6]);
    }
}
