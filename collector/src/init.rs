//! Collector initialization - directory layout and schema provisioning.
//!
//! # Tables
//!
//! - `collector_lock` - exactly one row (`id = 1`), the advisory lock
//! - `run_attempts` - ledger of runs, numbered by `run_attempt_seq`
//! - `snapshot_log` - every logged session row, tagged with its run
//!
//! # Diagnostic view
//!
//! Snapshots are read from `who_is_active` unless the config names another
//! statement. Provisioning installs a minimal view of that name when none
//! exists, reporting the collector's own connection (whose statement is
//! never logged). Teardown leaves the view in place since it may not be ours.

use std::fs;

use crate::store::Store;
use crate::{Config, Error, Result};

/// Initialize a new collector root.
///
/// Creates the directory structure, provisions the database and writes
/// the default config.
pub fn initialize(config: &Config) -> Result<()> {
    // Check if already initialized
    if is_initialized(config) {
        return Err(Error::AlreadyInitialized(config.wiac_root.clone()));
    }

    fs::create_dir_all(config.wiac_root.join("db"))?;

    let store = Store::create(config.clone())?;
    provision_schema(&store)?;

    config.save()?;

    Ok(())
}

/// Whether the config's database file exists.
pub fn is_initialized(config: &Config) -> bool {
    config.db_path().exists()
}

/// Tables that make up a provisioned collector.
const COLLECTOR_TABLES: [&str; 3] = ["collector_lock", "run_attempts", "snapshot_log"];

/// Whether every collector table exists and the lock row is seeded.
pub fn is_provisioned(store: &Store) -> Result<bool> {
    let conn = store.connection()?;
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name IN (?, ?, ?)",
        duckdb::params![COLLECTOR_TABLES[0], COLLECTOR_TABLES[1], COLLECTOR_TABLES[2]],
        |row| row.get(0),
    )?;
    if tables < COLLECTOR_TABLES.len() as i64 {
        return Ok(false);
    }

    let lock_rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM collector_lock WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(lock_rows == 1)
}

/// Provision an existing database that lacks the collector schema, such
/// as a fresh target file or one that was torn down.
///
/// Writes the config if the root has none. Returns whether anything was
/// missing.
pub fn ensure_provisioned(config: &Config) -> Result<bool> {
    let store = Store::open(config.clone())?;
    let missing = !is_provisioned(&store)?;
    if missing {
        provision_schema(&store)?;
    }

    if !config.wiac_root.join("config.toml").exists() {
        fs::create_dir_all(&config.wiac_root)?;
        config.save()?;
    }

    Ok(missing)
}

/// Create the collector tables and seed the lock. Safe to run repeatedly.
pub fn provision_schema(store: &Store) -> Result<()> {
    let conn = store.connection()?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS collector_lock (
            id INTEGER PRIMARY KEY,
            running INTEGER NOT NULL,
            lock_acquired_at TIMESTAMP
        );

        CREATE SEQUENCE IF NOT EXISTS run_attempt_seq START 1;

        CREATE TABLE IF NOT EXISTS run_attempts (
            record_number BIGINT PRIMARY KEY DEFAULT nextval('run_attempt_seq'),
            failure_time TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshot_log (
            record_number BIGINT NOT NULL,
            collection_batch_time TIMESTAMP NOT NULL,
            session_id BIGINT,
            elapsed VARCHAR,
            blocking_session_id BIGINT,
            wait_info VARCHAR,
            cpu VARCHAR,
            tempdb_allocations VARCHAR,
            tempdb_current VARCHAR,
            reads VARCHAR,
            writes VARCHAR,
            physical_reads VARCHAR,
            used_memory VARCHAR,
            sql_text VARCHAR,
            login_name VARCHAR,
            host_name VARCHAR,
            database_name VARCHAR,
            program_name VARCHAR,
            status VARCHAR,
            open_tran_count VARCHAR,
            percent_complete VARCHAR,
            start_time VARCHAR,
            login_time VARCHAR,
            row_collected_at TIMESTAMP NOT NULL
        );

        -- Seed the lock idle, once
        INSERT INTO collector_lock (id, running, lock_acquired_at)
        SELECT 1, 0, NULL
        WHERE NOT EXISTS (SELECT 1 FROM collector_lock WHERE id = 1);
        "#,
    )?;

    install_diagnostic_view(&conn)?;

    Ok(())
}

/// Install the fallback `who_is_active` view if nothing by that name exists.
fn install_diagnostic_view(conn: &duckdb::Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE VIEW IF NOT EXISTS who_is_active AS
        SELECT
            1::BIGINT AS session_id,
            '00 00:00:00.000' AS "dd hh:mm:ss.mss",
            NULL::BIGINT AS blocking_session_id,
            NULL::VARCHAR AS wait_info,
            current_query() AS sql_text,
            current_database() AS database_name,
            'wiac' AS program_name,
            'running' AS status,
            '0' AS open_tran_count,
            NULL::VARCHAR AS start_time
        "#,
    )?;
    Ok(())
}

/// Drop the collector tables and the attempt sequence.
pub fn drop_schema(store: &Store) -> Result<()> {
    let conn = store.connection()?;
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS snapshot_log;
        DROP TABLE IF EXISTS run_attempts;
        DROP SEQUENCE IF EXISTS run_attempt_seq;
        DROP TABLE IF EXISTS collector_lock;
        "#,
    )?;
    Ok(())
}
