//! wiac: Who Is Active Collector - CLI for sampling active sessions into a durable log.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "wiac")]
#[command(about = "Who Is Active Collector - sample active sessions into a durable log")]
#[command(version)]
struct Cli {
    /// Target as a connection string (e.g. "Server=db01;Database=/srv/db01.duckdb")
    #[arg(short = 'C', long = "connection", global = true)]
    connection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database, tables and config
    Init {
        /// Delete an existing database first (this will delete all collected data)
        #[arg(long = "force")]
        force: bool,
    },

    /// Collect snapshots, one run per minute
    #[command(visible_alias = "c")]
    Collect {
        /// Minutes to collect for (default from config); zero or negative runs once
        #[arg(short = 'm', long = "minutes", allow_negative_numbers = true)]
        minutes: Option<i64>,

        /// Snapshots per run (overrides config)
        #[arg(short = 'i', long = "iterations")]
        iterations: Option<u32>,

        /// Seconds between snapshots (overrides config)
        #[arg(short = 's', long = "interval")]
        interval: Option<u64>,

        /// Skip the wait after the last snapshot of each run
        #[arg(long = "no-final-pause")]
        no_final_pause: bool,

        /// Lock strategy: atomic (conditional update) or peek (read then write)
        #[arg(short = 'l', long = "lock-strategy")]
        lock_strategy: Option<String>,

        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,
    },

    /// Show logged snapshot rows
    #[command(visible_alias = "l")]
    Log {
        /// Sort order: asc, desc
        #[arg(short = 'o', long = "order", default_value = "asc")]
        order: String,

        /// Show at most N rows
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,

        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,
    },

    /// List recent run attempts
    #[command(visible_alias = "a")]
    Attempts {
        /// Show the last N attempts
        #[arg(short = 'n', long = "limit", default_value = "20")]
        limit: usize,

        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,
    },

    /// Inspect or clear the collector lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },

    /// Execute SQL query
    #[command(visible_alias = "q")]
    Sql {
        /// SQL query to execute
        query: String,
    },

    /// Drop the collector tables
    Teardown {
        /// Confirm dropping all collected data
        #[arg(long = "yes")]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show whether a collector holds the lock
    Status {
        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,
    },

    /// Mark the lock idle (after a collector died mid-run)
    Release,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let connection = cli.connection.as_deref();

    let result = match cli.command {
        Commands::Init { force } => commands::init(connection, force),
        Commands::Collect { minutes, iterations, interval, no_final_pause, lock_strategy, format } => {
            let overrides = commands::CollectOverrides {
                iterations,
                interval_secs: interval,
                no_final_pause,
                lock_strategy,
            };
            commands::collect(connection, minutes, &overrides, &format)
        }
        Commands::Log { order, limit, format } => commands::log(connection, &order, limit, &format),
        Commands::Attempts { limit, format } => commands::attempts(connection, limit, &format),
        Commands::Lock { action } => match action {
            LockAction::Status { format } => commands::lock_status(connection, &format),
            LockAction::Release => commands::lock_release(connection),
        },
        Commands::Sql { query } => commands::sql(connection, &query),
        Commands::Teardown { yes } => commands::teardown(connection, yes),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
