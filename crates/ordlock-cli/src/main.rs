//! `ordlock` - stress and diagnostics for ordlock synchronization primitives.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ordlock_core::config::{self, BackendKind, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "ordlock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to ./ordlock.toml when present)
    #[arg(short, long, global = true, env = "ORDLOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the lock-level catalogue, innermost level first
    Levels,

    /// Run randomized, order-respecting acquisitions over a mutex hierarchy
    Stress {
        /// Worker threads
        #[arg(short, long, default_value = "8")]
        threads: usize,

        /// Acquisition rounds per worker
        #[arg(short, long, default_value = "10000")]
        iterations: u64,

        /// Wait/wake backend (overrides the configuration)
        #[arg(short, long, value_enum)]
        backend: Option<BackendArg>,

        /// Seed for the per-worker random generators
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Bounce a token between two threads through a condition variable
    Pingpong {
        /// Round trips
        #[arg(short, long, default_value = "100000")]
        rounds: u64,

        /// Wait/wake backend (overrides the configuration)
        #[arg(short, long, value_enum)]
        backend: Option<BackendArg>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Futex,
    Portable,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Futex => Self::Futex,
            BackendArg::Portable => Self::Portable,
        }
    }
}

fn load_config(path: Option<&PathBuf>, backend: Option<BackendArg>) -> anyhow::Result<SyncConfig> {
    let mut config = match path {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::load()?,
    };
    if let Some(backend) = backend {
        config.backend = backend.into();
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Levels => {
            commands::print_levels();
        }
        Command::Stress {
            threads,
            iterations,
            backend,
            seed,
        } => {
            let mut config = load_config(cli.config.as_ref(), backend)?;
            // The per-mutex dump printed at the end needs the counters.
            config.log_contention = true;
            config::install(config)?;
            commands::run_stress(threads, iterations, seed)?;
        }
        Command::Pingpong { rounds, backend } => {
            config::install(load_config(cli.config.as_ref(), backend)?)?;
            commands::run_ping_pong(rounds)?;
        }
    }

    Ok(())
}
