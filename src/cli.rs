use clap::{Parser, Subcommand, ValueEnum};
use reelforge_common::TaskKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "Video composition service built on ffmpeg")]
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
    /// Start the HTTP API and the task workers
    Start {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Compose a single video locally, printing progress as it runs
    Run {
        /// JSON file with the composition parameters
        #[arg(required = true)]
        params: PathBuf,

        /// Kind of composition
        #[arg(long, value_enum)]
        kind: KindArg,

        /// Directory for the rendered video (overrides the config file)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
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

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    /// One image looped over an audio track
    ImageAudio,
    /// Several images joined with transitions
    Slideshow,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::ImageAudio => TaskKind::ImageAudioToVideo,
            KindArg::Slideshow => TaskKind::ImageSlideshow,
        }
    }
}
