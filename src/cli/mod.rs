//! Command-line interface for the range pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::calibration::{load_calibration_csv, CalibrationError};
use crate::core::loaders::open_log;
use crate::core::registry::SensorRegistry;
use crate::core::writers::{write_point_cloud, OutputFormat};
use crate::processors::extraction::{
    convert_log, extract_map, lookup_sensor, ConvertOptions, MapOptions,
};
use crate::processors::filtering::{apply_stride, combine_clouds, filter_height_band};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "range-pipeline")]
#[command(about = "Range sensor log to point cloud pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sensors of a calibration table
    Sensors {
        /// Calibration CSV file
        calibration: PathBuf,
    },

    /// Summarize the frames of a sensor log
    Inspect {
        /// Binary sensor log
        log_file: PathBuf,
    },

    /// Convert one sensor log to a point cloud file (.csv or .ply)
    Convert {
        /// Calibration CSV file
        calibration: PathBuf,
        /// Sensor name as listed in the calibration table
        sensor: String,
        /// Binary sensor log
        log_file: PathBuf,
        /// Output file; with --per-frame, frames are numbered after its stem
        output: PathBuf,
        /// Write one file per frame instead of one combined cloud
        #[arg(long)]
        per_frame: bool,
        /// Limit number of frames to convert
        #[arg(long)]
        max_frames: Option<usize>,
        /// Keep only points inside the configured height band
        #[arg(long)]
        band: bool,
    },

    /// Build a height-filtered snapshot map from every sensor
    Map {
        /// Calibration CSV file
        calibration: PathBuf,
        /// Directory with one log directory per sensor
        data_dir: PathBuf,
        /// Output file (.csv or .ply)
        output: PathBuf,
        /// Index of the log file used per sensor (sorted by name)
        #[arg(long)]
        log_index: Option<usize>,
        /// Keep all points instead of applying the height band
        #[arg(long)]
        no_band: bool,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Sensors { calibration } => {
            cmd_sensors(&calibration, &config);
        }
        Commands::Inspect { log_file } => {
            cmd_inspect(&log_file, &config);
        }
        Commands::Convert {
            calibration,
            sensor,
            log_file,
            output,
            per_frame,
            max_frames,
            band,
        } => {
            cmd_convert(
                &calibration,
                &sensor,
                &log_file,
                &output,
                per_frame,
                max_frames,
                band,
                &config,
            );
        }
        Commands::Map {
            calibration,
            data_dir,
            output,
            log_index,
            no_band,
        } => {
            cmd_map(&calibration, &data_dir, &output, log_index, no_band, &config);
        }
    }
}

/// Sensor rows of the calibration table that failed to load.
type Rejected = Vec<(String, CalibrationError)>;

/// Load the calibration table into a registry, returning it with the rejected rows.
fn load_registry(path: &Path, config: &PipelineConfig) -> Result<(SensorRegistry, Rejected)> {
    let mut table = load_calibration_csv(path, &config.calibration)
        .with_context(|| format!("Failed to load calibration: {}", path.display()))?;

    let rejected = std::mem::take(&mut table.rejected);

    let registry = SensorRegistry::from(table);
    if registry.is_empty() {
        bail!("No usable sensors in {}", path.display());
    }
    info!("Loaded {} sensors from {}", registry.len(), path.display());
    Ok((registry, rejected))
}

/// Output path of the `index`-th frame: `<dir>/<stem>_<index>.<ext>`.
fn per_frame_path(output: &Path, index: usize, format: OutputFormat) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());
    output.with_file_name(format!("{}_{:05}.{}", stem, index, format.extension()))
}

fn cmd_sensors(calibration: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    let (registry, rejected) = match load_registry(calibration, config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    println!(
        "{:<16} {:<10} {:>9} {:>9} {:>10} {:>10} {:>10}",
        "name", "type", "h_res", "v_res", "x [mm]", "y [mm]", "z [mm]"
    );
    for sensor in registry.iter() {
        let c = sensor.calibration();
        println!(
            "{:<16} {:<10} {:>9} {:>9} {:>10.1} {:>10.1} {:>10.1}",
            c.name,
            c.sensor_type,
            c.horizontal.resolution,
            c.vertical.resolution,
            c.position.x,
            c.position.y,
            c.position.z
        );
    }

    if !rejected.is_empty() {
        println!();
        println!("Rejected rows:");
        for (name, e) in &rejected {
            println!("  {:<16} {}", name, e);
        }
    }

    print_summary(
        "Calibration Loaded",
        &[
            ("Calibration file", calibration.display().to_string()),
            ("Sensors", registry.len().to_string()),
            ("Rejected rows", rejected.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

/// Frame statistics gathered by `inspect`.
#[derive(Debug, Default)]
struct LogStats {
    frames: usize,
    version: Option<String>,
    first_timestamp_ms: Option<i64>,
    last_timestamp_ms: Option<i64>,
    min_samples: Option<usize>,
    max_samples: Option<usize>,
    truncated: bool,
}

fn scan_log(log_file: &Path, config: &PipelineConfig) -> Result<LogStats> {
    let mut decoder = open_log(log_file)?;
    let mut stats = LogStats::default();

    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_truncated() && config.decoder.tolerate_truncated => {
                warn!("Truncated frame after {} frames: {}", stats.frames, e);
                stats.truncated = true;
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to decode frame {} of {}", stats.frames, log_file.display())
                })
            }
        };

        let timestamp = frame.timestamp_ms()?;
        stats.frames += 1;
        stats.version.get_or_insert_with(|| frame.version());
        stats.first_timestamp_ms.get_or_insert(timestamp);
        stats.last_timestamp_ms = Some(timestamp);
        stats.min_samples = Some(stats.min_samples.map_or(frame.len(), |m| m.min(frame.len())));
        stats.max_samples = Some(stats.max_samples.map_or(frame.len(), |m| m.max(frame.len())));
    }

    Ok(stats)
}

fn cmd_inspect(log_file: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    let spinner = create_spinner("Decoding frames...");
    let stats = match scan_log(log_file, config) {
        Ok(stats) => {
            spinner.finish_and_clear();
            stats
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Inspect failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    print_summary(
        "Log Summary",
        &[
            ("Log file", log_file.display().to_string()),
            ("Frames", stats.frames.to_string()),
            ("Version", optional(stats.version)),
            ("First timestamp", optional(stats.first_timestamp_ms.map(|t| t.to_string()))),
            ("Last timestamp", optional(stats.last_timestamp_ms.map(|t| t.to_string()))),
            ("Min samples", optional(stats.min_samples.map(|n| n.to_string()))),
            ("Max samples", optional(stats.max_samples.map(|n| n.to_string()))),
            ("Truncated tail", stats.truncated.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

#[allow(clippy::too_many_arguments)]
fn run_convert(
    calibration: &Path,
    sensor_name: &str,
    log_file: &Path,
    output: &Path,
    per_frame: bool,
    max_frames: Option<usize>,
    band: bool,
    config: &PipelineConfig,
) -> Result<(usize, usize, usize)> {
    let format = OutputFormat::from_path(output)?;
    let (registry, _) = load_registry(calibration, config)?;
    let sensor = lookup_sensor(&registry, sensor_name)?;

    let mut options = ConvertOptions::from(config);
    if max_frames.is_some() {
        options.max_frames = max_frames;
    }

    let frames = convert_log(sensor, log_file, &options)
        .with_context(|| format!("Failed to convert {}", log_file.display()))?;
    if frames.is_empty() {
        bail!("No frames decoded from {}", log_file.display());
    }

    let height_band = config.processing.height_band();
    let stride = config.processing.point_stride;
    let finish = |cloud: &crate::PointCloud| {
        let cloud = if band {
            filter_height_band(cloud, height_band)
        } else {
            cloud.clone()
        };
        apply_stride(&cloud, stride)
    };

    let mut points = 0;
    let files = if per_frame {
        for (index, frame) in frames.iter().enumerate() {
            let cloud = finish(&frame.cloud);
            let path = per_frame_path(output, index, format);
            write_point_cloud(&path, &cloud)?;
            points += cloud.len();
        }
        frames.len()
    } else {
        let combined = combine_clouds(frames.iter().map(|f| &f.cloud));
        let cloud = finish(&combined);
        write_point_cloud(output, &cloud)?;
        points = cloud.len();
        1
    };

    Ok((frames.len(), points, files))
}

#[allow(clippy::too_many_arguments)]
fn cmd_convert(
    calibration: &Path,
    sensor: &str,
    log_file: &Path,
    output: &Path,
    per_frame: bool,
    max_frames: Option<usize>,
    band: bool,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    println!("Converting sensor log...");
    println!("Sensor: {}", sensor);
    println!("Input: {}", log_file.display());
    println!("Output: {}", output.display());

    let spinner = create_spinner("Projecting frames to world coordinates...");

    match run_convert(
        calibration,
        sensor,
        log_file,
        output,
        per_frame,
        max_frames,
        band,
        config,
    ) {
        Ok((frames, points, files)) => {
            spinner.finish_and_clear();

            print_summary(
                "Conversion Complete",
                &[
                    ("Sensor", sensor.to_string()),
                    ("Input file", log_file.display().to_string()),
                    ("Output", output.display().to_string()),
                    ("Frames converted", frames.to_string()),
                    ("Files written", files.to_string()),
                    ("Points written", points.to_string()),
                    ("Height band", band.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Conversion failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_map(
    calibration: &Path,
    data_dir: &Path,
    output: &Path,
    log_index: Option<usize>,
    no_band: bool,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    println!("Building snapshot map...");
    println!("Data directory: {}", data_dir.display());
    println!("Output: {}", output.display());

    let (registry, rejected) = match load_registry(calibration, config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let mut options = MapOptions::from(config);
    if let Some(index) = log_index {
        options.log_file_index = index;
    }
    if no_band {
        options.band = None;
    }

    let spinner = create_spinner("Extracting one frame per sensor...");
    let result = extract_map(&registry, data_dir, &options);
    spinner.finish_and_clear();

    if result.contributions.is_empty() {
        error!("No sensor produced a frame from {}", data_dir.display());
        std::process::exit(1);
    }

    let cloud = apply_stride(&result.cloud, config.processing.point_stride);
    if let Err(e) = write_point_cloud(output, &cloud) {
        error!("Failed to write map: {}", e);
        std::process::exit(1);
    }

    print_summary(
        "Map Complete",
        &[
            ("Data directory", data_dir.display().to_string()),
            ("Output file", output.display().to_string()),
            (
                "Timestamp [ms]",
                result.timestamp_ms.map_or_else(|| "-".to_string(), |t| t.to_string()),
            ),
            ("Sensors used", result.contributions.len().to_string()),
            (
                "Sensors failed",
                (result.failures.len() + rejected.len()).to_string(),
            ),
            ("Points written", cloud.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}
