//! alloc-track CLI - run allocation workloads under tracking or a limit.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(
    name = "alloc-track",
    version,
    about = "Per-thread allocation tracking for managed heaps",
    long_about = "Runs allocation workloads on the reference heap and reports what the tracker saw.\n\n\
                  Count a workload:    alloc-track run --objects 1000 --retain 10\n\
                  Enforce a limit:     alloc-track run --limit 500 --retain 600\n\
                  Measure overhead:    alloc-track bench"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate a workload and report per-thread counters
    Run(commands::run::RunCommand),

    /// Compare allocation throughput with and without tracking
    Bench(commands::bench::BenchCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "alloc_track=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Bench(cmd) => cmd.run(&config),
    }
}
