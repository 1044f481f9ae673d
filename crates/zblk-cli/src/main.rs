//! zblk CLI - exercise and inspect in-memory compressed block devices.

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

/// zblk: compressed block-store workbench
#[derive(Parser)]
#[command(name = "zblk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a write/read workload against a fresh device and report stats
    Bench(commands::BenchArgs),

    /// Run round-trip and discard self-checks
    Verify(commands::VerifyArgs),

    /// Show supported algorithms and device constants
    Info,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Bench(args) => commands::bench(&args, cli.format),
        Commands::Verify(args) => commands::verify(&args),
        Commands::Info => commands::info(cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
