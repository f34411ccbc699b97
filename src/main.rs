//! rebuf - durable on-disk ring buffer
//!
//! Command-line front-end for appending to, replaying and inspecting a
//! rebuf log directory.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rebuf")]
#[command(about = "Durable, segmented on-disk ring buffer")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "REBUF_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory (overrides config file and environment)
    #[arg(short = 'd', long)]
    log_dir: Option<PathBuf>,

    /// Maximum staging segment size in bytes
    #[arg(long)]
    max_segment_size: Option<u64>,

    /// Maximum number of sealed segments kept
    #[arg(long)]
    max_segments: Option<usize>,

    /// Background fsync interval in milliseconds (0 disables)
    #[arg(long)]
    sync_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Append records
    Append {
        /// Record payloads
        payloads: Vec<String>,

        /// Read records from stdin, one per line
        #[arg(long)]
        stdin: bool,
    },

    /// Replay every record in offset order
    Replay {
        /// Print payloads as hex
        #[arg(long)]
        hex: bool,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the oldest and latest offsets
    Offsets,

    /// List sealed segments
    Segments,

    /// Check every segment for torn records and offset gaps
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.log_dir {
        config.log_dir = dir;
    }
    if let Some(size) = cli.max_segment_size {
        config.max_segment_size = size;
    }
    if let Some(count) = cli.max_segments {
        config.max_segments = count;
    }
    if let Some(ms) = cli.sync_interval_ms {
        config.sync_interval_ms = ms;
    }
    tracing::debug!(?config, "resolved configuration");

    match commands::execute(config, cli.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}
