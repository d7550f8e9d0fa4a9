use std::path::PathBuf;

use clap::{Parser, Subcommand};

use trapdata_models::{Scope, SessionId};

#[derive(Parser)]
#[command(name = "trapdata-worker")]
#[command(about = "Camera-trap image processing pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database file (overrides TRAPDATA_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a trap directory for new images
    Discover {
        /// Base directory of one trap
        dir: PathBuf,

        /// Queue every newly found image
        #[arg(long)]
        enqueue: bool,
    },

    /// Queue unprocessed images for the next run
    Enqueue {
        #[arg(long)]
        session: Option<i64>,

        /// Queue at most this many images, oldest first
        #[arg(long, conflicts_with_all = ["sample", "image"])]
        limit: Option<usize>,

        /// Top the queue up to this many randomly chosen images
        #[arg(long, conflicts_with = "image")]
        sample: Option<usize>,

        /// Queue specific image ids
        #[arg(long = "image", num_args = 1..)]
        image: Vec<i64>,
    },

    /// Run every stage over the queue
    Run {
        /// Restrict the run to one monitoring session
        #[arg(long)]
        session: Option<i64>,

        /// Abort the run when one batch takes longer than this
        #[arg(long)]
        batch_timeout_secs: Option<u64>,

        /// Load models on the CPU
        #[arg(long)]
        cpu: bool,
    },

    /// Show whether a run is active and the queue counts per stage
    Status {
        #[arg(long)]
        session: Option<i64>,
    },

    /// Delete detections and queue every image again
    Clear {
        #[arg(long)]
        session: Option<i64>,
    },

    /// Per-label counts with representative examples
    Summarize {
        #[arg(long)]
        session: Option<i64>,

        /// Leave out detections scoring below this
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,

        /// Examples per label
        #[arg(long, default_value_t = 3)]
        examples: usize,
    },

    /// Export detections as JSON
    Export {
        /// Export one session under its standard report name in `output`
        #[arg(long)]
        session: Option<i64>,

        /// Output directory with --session, otherwise the output file
        #[arg(long)]
        output: PathBuf,
    },

    /// List monitoring sessions
    Sessions,

    /// List models available per stage
    Models,
}

pub fn scope(session: Option<i64>) -> Scope {
    session.map_or(Scope::All, |id| Scope::Session(SessionId(id)))
}
