//! landclaim CLI - operator tools for a land data directory.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// landclaim - inspect and maintain chunk claims and towns
#[derive(Parser, Debug)]
#[command(name = "landclaim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory holding towns/, claims.json and backups/
    #[arg(short, long, global = true, default_value = "data")]
    data: PathBuf,

    /// TOML config file (default: built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show towns, or one town in detail
    Inspect {
        /// Town to show (case-insensitive)
        #[arg(short, long)]
        town: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,
    },

    /// Show who holds the chunk containing a block
    Owner {
        /// World name
        world: String,

        /// Block X coordinate
        #[arg(allow_negative_numbers = true)]
        x: i32,

        /// Block Z coordinate
        #[arg(allow_negative_numbers = true)]
        z: i32,
    },

    /// Check claims and towns for inconsistencies
    Validate,

    /// List dated snapshots
    Backups,

    /// Collect town upkeep if due
    Upkeep {
        /// Run even if upkeep already ran today or the hour has not come
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let opened = cli::open_context(&args.data, args.config.as_deref());

    let result = opened.and_then(|ctx| {
        let result = match args.command {
            Commands::Inspect { town, format } => {
                cli::inspect::execute(&ctx, town.as_deref(), format)
            }
            Commands::Owner { world, x, z } => cli::owner::execute(&ctx, &world, x, z),
            Commands::Validate => cli::validate::execute(&ctx),
            Commands::Backups => cli::backups::execute(&ctx),
            Commands::Upkeep { force } => cli::upkeep::execute(&ctx, force),
        };
        ctx.shutdown();
        result
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
