//! Point cloud writers for CSV and PLY.
//!
//! Both formats store world coordinates in mm with six decimals.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::loaders::PointCloud;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Output extension is neither `.csv` nor `.ply`.
    #[error("unsupported output format for '{0}', expected .csv or .ply")]
    UnsupportedFormat(String),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// On-disk point cloud format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Ply,
}

impl OutputFormat {
    /// Pick the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Ok(OutputFormat::Csv),
            Some("ply") => Ok(OutputFormat::Ply),
            _ => Err(WriteError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Ply => "ply",
        }
    }
}

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn write_ply_to<W: Write>(writer: &mut W, cloud: &PointCloud) -> std::io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "end_header")?;

    for i in 0..cloud.len() {
        writeln!(
            writer,
            "{:.6} {:.6} {:.6}",
            cloud.x[i], cloud.y[i], cloud.z[i]
        )?;
    }
    writer.flush()
}

/// Write point cloud to an ASCII PLY file.
///
/// The header declares one `vertex` element with float `x`, `y` and `z`
/// properties, followed by one line per point.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `cloud` - Point cloud in world coordinates
///
/// # Errors
///
/// Returns an error if the parent directories or the file cannot be
/// created, or if writing fails.
///
/// # Example
///
/// ```no_run
/// use range_pipeline::core::loaders::PointCloud;
/// use range_pipeline::core::writers::write_ply;
/// use std::path::Path;
///
/// let cloud = PointCloud::default();
/// write_ply(Path::new("output.ply"), &cloud).unwrap();
/// ```
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    write_ply_to(&mut writer, cloud).map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Write point cloud to CSV with x, y, z columns.
///
/// Creates a CSV file with headers "x,y,z" and one row per point.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `cloud` - Point cloud in world coordinates
///
/// # Errors
///
/// Returns an error if the parent directories or the file cannot be
/// created, or if a record cannot be written.
pub fn write_cartesian_csv(path: &Path, cloud: &PointCloud) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    csv_writer
        .write_record(["x", "y", "z"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for i in 0..cloud.len() {
        csv_writer
            .write_record(&[
                format!("{:.6}", cloud.x[i]),
                format!("{:.6}", cloud.y[i]),
                format!("{:.6}", cloud.z[i]),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write point cloud in the format named by the path's extension.
pub fn write_point_cloud(path: &Path, cloud: &PointCloud) -> Result<OutputFormat> {
    let format = OutputFormat::from_path(path)?;
    match format {
        OutputFormat::Csv => write_cartesian_csv(path, cloud)?,
        OutputFormat::Ply => write_ply(path, cloud)?,
    }
    Ok(format)
}
