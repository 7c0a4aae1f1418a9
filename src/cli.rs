use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use glasscast::capture::{CaptureRegion, Rect};

#[derive(Parser)]
#[command(name = "glasscast")]
#[command(author, version, about = "Low-latency screen casting to DLNA televisions")]
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
    /// Search the local network for DLNA renderers
    Discover {
        /// How long to listen for responses (defaults to the configured timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Cast the screen to a renderer until interrupted
    Cast {
        /// Renderer to use: list index, uuid, or part of its name
        #[arg(short, long)]
        renderer: Option<String>,

        #[command(flatten)]
        region: RegionArgs,

        /// Discovery timeout (defaults to the configured timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run the encoder and segment server without a renderer
    Serve {
        #[command(flatten)]
        region: RegionArgs,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args)]
pub struct RegionArgs {
    /// Capture area as x,y,width,height
    #[arg(long, conflicts_with = "monitor")]
    pub region: Option<Rect>,

    /// Capture a whole monitor by 1-based index
    #[arg(short, long)]
    pub monitor: Option<usize>,
}

impl RegionArgs {
    pub fn capture_region(&self) -> CaptureRegion {
        match (self.region, self.monitor) {
            (Some(rect), _) => CaptureRegion::Area(rect),
            (None, Some(monitor)) => CaptureRegion::FullDisplay { monitor },
            (None, None) => CaptureRegion::FullDisplay { monitor: 1 },
        }
    }
}
