use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffpreview")]
#[command(author, version, about = "Render per-stream previews of media files using ffmpeg")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a PNG per stream for each file
    Preview {
        /// Files to preview
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Range to preview: [[hh:]mm:]ss[,delta[,duration]]
        #[arg(long, allow_hyphen_values = true)]
        cut: Option<String>,

        /// Directory to write images to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Target width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Target height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Show the ffmpeg command line and its stderr
        #[arg(long)]
        debug: bool,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output the raw ffprobe JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that ffmpeg and ffprobe are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
