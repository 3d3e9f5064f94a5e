use clap::Parser;
use std::path::PathBuf;

use crate::entities::SourceSpec;

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Images: image 0.25 (png, jpeg, tiff, tga, bmp)\n",
    "Video:  none\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless video tracking player
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Image files played as one sequence, in the given order
    #[arg(value_name = "FILE")]
    pub sources: Vec<PathBuf>,

    /// Glob pattern of an image sequence (e.g. "shots/cam1_*.png")
    #[arg(short = 'p', long = "pattern", value_name = "GLOB")]
    pub pattern: Option<String>,

    /// Video file
    #[arg(long = "video", value_name = "FILE")]
    pub video: Option<PathBuf>,

    /// Camera device index
    #[arg(long = "camera", value_name = "INDEX")]
    pub camera: Option<i32>,

    /// Target playback rate (0 = as fast as possible; default from config)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Tracking algorithm to activate (default from config)
    #[arg(short = 'a', long = "algorithm", value_name = "NAME")]
    pub algorithm: Option<String>,

    /// Play without running the algorithm's track()
    #[arg(long = "no-track")]
    pub no_track: bool,

    /// Print the registered algorithms and exit
    #[arg(long = "list-algorithms")]
    pub list_algorithms: bool,

    /// Trajectory archive loaded before playback
    #[arg(long = "load", value_name = "ARCHIVE")]
    pub load: Option<PathBuf>,

    /// Write the trajectory archive after playback
    #[arg(long = "save", value_name = "ARCHIVE")]
    pub save: Option<PathBuf>,

    /// Write trajectories as CSV after playback
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Frame range for CSV export (defaults to the record markers)
    #[arg(long = "range", value_names = ["START", "END"], num_args = 2)]
    pub range: Option<Vec<u64>>,

    /// Enable debug logging to file (default: trackplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// Stream to open. Priority: camera, video, pattern, files.
    pub fn source_spec(&self) -> Option<SourceSpec> {
        if let Some(index) = self.camera {
            return Some(SourceSpec::Camera(index));
        }
        if let Some(path) = &self.video {
            return Some(SourceSpec::Video(path.clone()));
        }
        if let Some(pattern) = &self.pattern {
            return Some(SourceSpec::Pattern(pattern.clone()));
        }
        if !self.sources.is_empty() {
            return Some(SourceSpec::Images(self.sources.clone()));
        }
        None
    }

    /// `--range START END` as an inclusive range
    pub fn export_range(&self) -> Option<std::ops::RangeInclusive<u64>> {
        match self.range.as_deref() {
            Some([a, b]) => Some(*a.min(b)..=*a.max(b)),
            _ => None,
        }
    }
}
