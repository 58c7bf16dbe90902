//! CLI command implementations.

use collector::collect::normalize_minutes;
use collector::{
    init, AttemptSummary, CollectOptions, Collector, Config, Credentials, LockStore,
    LogOrder, QueryResult, RunOutcome, SqlSnapshotSource, Store, SystemClock,
};

/// Column values wider than this are truncated in table output.
const MAX_CELL_WIDTH: usize = 50;

/// Command-line overrides for a collection.
pub struct CollectOverrides {
    pub iterations: Option<u32>,
    pub interval_secs: Option<u64>,
    pub no_final_pause: bool,
    pub lock_strategy: Option<String>,
}

/// Load the config, pointing it at `connection` when one is given.
fn load_config(connection: Option<&str>) -> collector::Result<Config> {
    let mut config = Config::load()?;
    if let Some(connection) = connection {
        let credentials = Credentials::from_connection_string(connection)?;
        config.apply_credentials(&credentials);
    }
    Ok(config)
}

fn open_store(connection: Option<&str>) -> collector::Result<Store> {
    Store::open(load_config(connection)?)
}

pub fn init(connection: Option<&str>, force: bool) -> collector::Result<()> {
    let mut config = Config::default_location()?;
    if let Some(connection) = connection {
        config.apply_credentials(&Credentials::from_connection_string(connection)?);
    }

    if init::is_initialized(&config) {
        if force {
            let db_path = config.db_path();
            std::fs::remove_file(&db_path)?;
            // DuckDB keeps a write-ahead log next to the database
            let _ = std::fs::remove_file(format!("{}.wal", db_path.display()));
            println!("Removed existing database at {}", db_path.display());
        } else {
            if init::ensure_provisioned(&config)? {
                println!("Provisioned collector tables in {}", config.db_path().display());
            } else {
                println!("Collector already initialized at {}", config.db_path().display());
                println!("Use --force to re-initialize (this will delete all data)");
            }
            return Ok(());
        }
    }

    init::initialize(&config)?;
    println!("Collector initialized at {}", config.wiac_root.display());
    println!("Server: {}", config.server);
    println!("Database: {}", config.db_path().display());

    Ok(())
}

pub fn collect(
    connection: Option<&str>,
    minutes: Option<i64>,
    overrides: &CollectOverrides,
    format: &str,
) -> collector::Result<()> {
    let config = load_config(connection)?;
    let store = Store::open(config.clone())?;

    let mut options = CollectOptions::from(&config);
    if let Some(iterations) = overrides.iterations {
        options.poll_iterations = iterations;
    }
    if let Some(secs) = overrides.interval_secs {
        options.poll_interval = std::time::Duration::from_secs(secs);
    }
    if overrides.no_final_pause {
        options.pause_after_last = false;
    }
    if let Some(ref strategy) = overrides.lock_strategy {
        options.lock_strategy = strategy.parse()?;
    }

    let minutes = normalize_minutes(minutes.unwrap_or(config.default_minutes as i64));
    let source = SqlSnapshotSource::from_config(&store);
    let clock = SystemClock;
    let runner = Collector::new(&store, &source, &clock, config.server.clone())
        .with_options(options);

    let summary = runner.run_for_minutes(minutes as i64)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{}", json);
        }
        _ => {
            for outcome in &summary.outcomes {
                match outcome {
                    RunOutcome::Collected { record_number, rows_polled, rows_persisted } => {
                        println!(
                            "run {}: collected {} rows ({} polled)",
                            record_number, rows_persisted, rows_polled
                        );
                    }
                    RunOutcome::LockHeld { record_number, held_since } => {
                        let since = held_since
                            .map(|t| format!(" since {}", t.format("%Y-%m-%d %H:%M:%S")))
                            .unwrap_or_default();
                        println!("run {}: skipped, lock held{}", record_number, since);
                    }
                }
            }
            println!(
                "\n{} runs: {} collected, {} skipped, {} rows logged",
                summary.runs(),
                summary.collected(),
                summary.skipped(),
                summary.rows_persisted()
            );
        }
    }

    Ok(())
}

pub fn log(
    connection: Option<&str>,
    order: &str,
    limit: Option<usize>,
    format: &str,
) -> collector::Result<()> {
    let store = open_store(connection)?;
    let order: LogOrder = order.parse()?;

    let result = store.query_log(order, limit)?;
    print_result(&result, format)
}

pub fn attempts(connection: Option<&str>, limit: usize, format: &str) -> collector::Result<()> {
    let store = open_store(connection)?;
    let attempts = store.recent_attempts(limit)?;

    if format == "json" {
        let json = serde_json::to_string_pretty(&attempts)?;
        println!("{}", json);
        return Ok(());
    }

    if attempts.is_empty() {
        println!("No run attempts recorded.");
        return Ok(());
    }

    println!("{:>8}  {:19}  {:>6}", "RECORD", "STARTED", "ROWS");
    for AttemptSummary { record_number, failure_time, rows_logged } in &attempts {
        println!(
            "{:>8}  {:19}  {:>6}",
            record_number,
            failure_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            rows_logged
        );
    }

    Ok(())
}

pub fn lock_status(connection: Option<&str>, format: &str) -> collector::Result<()> {
    let store = open_store(connection)?;
    let state = store.peek()?;

    if format == "json" {
        let json = serde_json::to_string_pretty(&state)?;
        println!("{}", json);
        return Ok(());
    }

    let acquired = state
        .lock_acquired_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    if state.is_held() {
        println!("held (running = {}), acquired {}", state.running, acquired);
    } else {
        println!("idle, last acquired {}", acquired);
    }

    Ok(())
}

pub fn lock_release(connection: Option<&str>) -> collector::Result<()> {
    let store = open_store(connection)?;
    let was_held = store.peek()?.is_held();
    store.release()?;

    if was_held {
        println!("Lock released.");
    } else {
        println!("Lock was already idle.");
    }
    Ok(())
}

pub fn sql(connection: Option<&str>, query: &str) -> collector::Result<()> {
    let store = open_store(connection)?;
    let result = store.query(query)?;
    print_result(&result, "table")
}

pub fn teardown(connection: Option<&str>, yes: bool) -> collector::Result<()> {
    let store = open_store(connection)?;

    if !yes {
        println!("This drops the lock, run_attempts and snapshot_log tables.");
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    init::drop_schema(&store)?;
    println!("Collector tables dropped from {}", store.config().db_path().display());
    Ok(())
}

/// Print a query result as an aligned table or as JSON.
fn print_result(result: &QueryResult, format: &str) -> collector::Result<()> {
    if format == "json" {
        let json = serde_json::to_string_pretty(&result.to_json_rows())?;
        println!("{}", json);
        return Ok(());
    }

    if result.rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| truncate(v.as_deref().unwrap_or("NULL"))).collect())
        .collect();

    // Calculate column widths
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, val) in row.iter().enumerate() {
            widths[i] = widths[i].max(val.chars().count());
        }
    }

    for (i, col) in result.columns.iter().enumerate() {
        print!("{:width$} ", col, width = widths[i]);
    }
    println!();

    for width in &widths {
        print!("{} ", "-".repeat(*width));
    }
    println!();

    for row in &cells {
        for (i, val) in row.iter().enumerate() {
            print!("{:width$} ", val, width = widths[i]);
        }
        println!();
    }

    println!("\n({} rows)", result.rows.len());

    Ok(())
}

fn truncate(s: &str) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() > MAX_CELL_WIDTH {
        let cut: String = flat.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
