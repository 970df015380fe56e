//! Gluewave CLI: record glued takes and manage their provenance.
//!
//! Usage:
//!   gluewave record --big <MEDIA> [OPTIONS]   Record a bounded take
//!   gluewave scan <VIDEO>                     Recover the embedded payload
//!   gluewave mint <VIDEO> --mood <MOOD>       Scan, hash and pack a video
//!   gluewave open <PACK>...                   List packs, newest first
//!   gluewave check                            Check encoder capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "gluewave",
    about = "Loop two clips in lockstep and record provenance-stamped takes",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a take of BIG with SMALL as picture-in-picture
    Record {
        /// Still image or video clip used as the BIG source
        #[arg(long)]
        big: PathBuf,

        /// Still image or video clip used as the SMALL source
        #[arg(long)]
        small: Option<PathBuf>,

        /// Loop length of a still BIG in seconds
        #[arg(long, default_value = "8.0")]
        big_loop: f64,

        /// Loop length of a still SMALL in seconds
        #[arg(long, default_value = "3.0")]
        small_loop: f64,

        /// Stop after this many seconds (capped by the configured ceiling)
        #[arg(long)]
        seconds: Option<u64>,

        /// Glue SMALL to BIG before recording
        #[arg(long)]
        glue: bool,

        /// BIG gain [0.0, 1.0]
        #[arg(long, default_value = "1.0")]
        big_gain: f64,

        /// SMALL gain [0.0, 1.0]
        #[arg(long, default_value = "1.0")]
        small_gain: f64,

        /// Master gain [0.0, 1.0]
        #[arg(long, default_value = "1.0")]
        master_gain: f64,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Discard the take instead of saving it
        #[arg(long)]
        discard: bool,
    },

    /// Scan a video for an embedded provenance payload
    Scan {
        /// Path to the video
        video: PathBuf,
    },

    /// Mint a pack from a provenance-bearing video
    Mint {
        /// Path to the video
        video: PathBuf,

        /// Short free-form mood
        #[arg(long)]
        mood: String,

        /// Optional intention text
        #[arg(long)]
        intention: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Open one or more packs and list them newest first
    Open {
        /// Pack files
        #[arg(required = true)]
        packs: Vec<PathBuf>,

        /// Extract each pack's video into this directory
        #[arg(long)]
        extract: Option<PathBuf>,
    },

    /// Check encoder capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = gluewave_common::config::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    gluewave_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            big,
            small,
            big_loop,
            small_loop,
            seconds,
            glue,
            big_gain,
            small_gain,
            master_gain,
            output,
            discard,
        } => {
            commands::record::run(
                config,
                commands::record::RecordArgs {
                    big,
                    small,
                    big_loop,
                    small_loop,
                    seconds,
                    glue,
                    big_gain,
                    small_gain,
                    master_gain,
                    output,
                    discard,
                },
            )
            .await
        }
        Commands::Scan { video } => commands::scan::run(video).await,
        Commands::Mint {
            video,
            mood,
            intention,
            output,
        } => commands::mint::run(video, mood, intention, output).await,
        Commands::Open { packs, extract } => commands::open::run(packs, extract),
        Commands::Check => commands::check::run(),
    }
}
