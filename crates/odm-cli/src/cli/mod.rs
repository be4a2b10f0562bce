//! CLI for the ODM mirror downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use odm_core::config;
use std::path::PathBuf;

use commands::{run_checksum, run_completions, run_plan_command, run_probe};

/// Top-level CLI for the ODM mirror downloader.
#[derive(Debug, Parser)]
#[command(name = "odm")]
#[command(about = "ODM: resumable multi-strategy downloader for open-data mirrors", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Execute a download plan (NDJSON, one item per line).
    Run {
        /// Path to the plan file.
        plan: PathBuf,
        /// Report the intended first strategy per item without opening sockets.
        #[arg(long)]
        dry_run: bool,
        /// Override the state directory (history, logs).
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
        /// Run up to N plan items concurrently (max 2; never two for the same destination).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Probe a URL and print the remote metadata (rate-limited).
    Probe {
        /// Direct HTTP/HTTPS URL.
        url: String,
    },

    /// Compute SHA-256 of a file (e.g. to cross-check a downloaded artifact).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<i32> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run {
                plan,
                dry_run,
                state_dir,
                jobs,
            } => run_plan_command(cfg, &plan, dry_run, state_dir, jobs).await,
            CliCommand::Probe { url } => {
                run_probe(cfg, &url).await?;
                Ok(0)
            }
            CliCommand::Checksum { path } => {
                run_checksum(&path)?;
                Ok(0)
            }
            CliCommand::Completions { shell } => {
                run_completions(shell);
                Ok(0)
            }
        }
    }
}
