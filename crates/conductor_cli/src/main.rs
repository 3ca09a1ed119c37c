//! Conductor CLI
//!
//! Runs the synchronization engine against simulated backends.
//!
//! # Commands
//!
//! - `run` - Seed a store from a fixture and run the sweeps once or as a daemon
//! - `inspect` - Display entity states of a file store

mod commands;
mod fixture;
mod simulated;

use clap::{Parser, Subcommand};
use conductor_core::SyncState;
use conductor_engine::{EngineConfig, ReadyRetryConfig, SweepConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Conductor synchronization engine runner.
#[derive(Parser)]
#[command(name = "conductor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state store directory (in-memory when omitted)
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed entities and credentials from a fixture and run the sweeps
    Run {
        /// JSON fixture with backends, entities, credentials and tasks
        #[arg(short, long)]
        fixture: Option<PathBuf>,

        /// Keep running with periodic sweeps until Ctrl-C
        #[arg(short, long)]
        daemon: bool,

        /// Number of workers (daemon mode)
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Seconds between sync sweeps
        #[arg(long, default_value = "3600")]
        sync_interval: u64,

        /// Seconds between recovery sweeps
        #[arg(long, default_value = "1800")]
        recovery_interval: u64,

        /// Retries granted to operations waiting on a link
        #[arg(long, default_value = "120")]
        ready_retries: u32,

        /// Seconds between those retries
        #[arg(long, default_value = "30")]
        ready_delay: u64,

        /// Virtual seconds a one-shot run may fast-forward through
        #[arg(long, default_value = "3600")]
        horizon: u64,
    },

    /// Display entity states
    Inspect {
        /// List every entity
        #[arg(short, long)]
        entities: bool,

        /// Only show entities in this state (e.g. ERRED)
        #[arg(long)]
        state: Option<SyncState>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            fixture,
            daemon,
            workers,
            sync_interval,
            recovery_interval,
            ready_retries,
            ready_delay,
            horizon,
        } => {
            let config = EngineConfig::new()
                .with_workers(workers)
                .with_sync_sweep(SweepConfig::new(Duration::from_secs(sync_interval)))
                .with_recovery_sweep(SweepConfig::new(Duration::from_secs(recovery_interval)))
                .with_ready_retry(ReadyRetryConfig::new(
                    ready_retries,
                    Duration::from_secs(ready_delay),
                ));
            commands::run::run(commands::run::RunOptions {
                fixture: fixture.as_deref(),
                store: cli.store.as_deref(),
                config,
                daemon,
                horizon: Duration::from_secs(horizon),
            })?;
        }
        Commands::Inspect {
            entities,
            state,
            format,
        } => {
            let path = cli.store.ok_or("State store path required for inspect")?;
            commands::inspect::run(&path, entities, state, &format)?;
        }
        Commands::Version => {
            println!("Conductor CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Conductor Core v{}", conductor_core::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_to_one_shot() {
        let cli = Cli::try_parse_from(["conductor", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                daemon, horizon, ..
            } => {
                assert!(!daemon);
                assert_eq!(horizon, 3600);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_accepts_daemon_flag() {
        let cli = Cli::try_parse_from(["conductor", "run", "--daemon"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { daemon: true, .. }));
        assert!(Cli::try_parse_from(["conductor", "run", "--once"]).is_err());
    }
}
