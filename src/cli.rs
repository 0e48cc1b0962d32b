use clap::{Parser, Subcommand};
use mediakiln_common::{JobId, MediaId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediakiln")]
#[command(author, version, about = "Adaptive media transcoding and rendition cache")]
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
    /// Transcode a file to a quality tier and wait for the result
    Run {
        /// Input file to transcode
        #[arg(required = true)]
        input: PathBuf,

        /// Requested quality tier (240p, 360p, 480p, 720p, 1080p, 4k)
        #[arg(short, long, default_value = "720p")]
        quality: String,

        /// Media identifier to cache the rendition under (random if omitted)
        #[arg(long)]
        media_id: Option<MediaId>,
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

    /// Show the status of a transcode job
    Status {
        /// Job identifier returned by run
        job_id: JobId,
    },

    /// List cached quality tiers for a media item
    Qualities {
        /// Media identifier
        media_id: MediaId,
    },

    /// Evict cached renditions not accessed recently
    Purge {
        /// Age threshold in hours
        #[arg(long, default_value = "24")]
        older_than_hours: u64,
    },

    /// Delete old completed/failed job records
    PruneJobs {
        /// Age threshold in days
        #[arg(long, default_value = "7")]
        older_than_days: u64,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Display version information
    Version,
}
