//! Snapshot sources - where the "who is active" rows come from.

use chrono::{DateTime, Utc};

use crate::schema::SnapshotRow;
use crate::store::{QueryResult, Store};
use crate::{Error, Result};

/// One call returns every session active at that moment.
pub trait SnapshotSource {
    /// Take a snapshot. Rows are stamped with `at`.
    fn snapshot(&self, at: DateTime<Utc>) -> Result<Vec<SnapshotRow>>;
}

/// Runs a diagnostic SQL statement against the store's database.
pub struct SqlSnapshotSource<'a> {
    store: &'a Store,
    statement: String,
}

impl<'a> SqlSnapshotSource<'a> {
    pub fn new(store: &'a Store, statement: impl Into<String>) -> Self {
        Self {
            store,
            statement: statement.into(),
        }
    }

    /// Use the statement named in the store's config.
    pub fn from_config(store: &'a Store) -> Self {
        Self::new(store, store.config().snapshot_query.clone())
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }
}

impl SnapshotSource for SqlSnapshotSource<'_> {
    fn snapshot(&self, at: DateTime<Utc>) -> Result<Vec<SnapshotRow>> {
        let result = self
            .store
            .query(&self.statement)
            .map_err(|e| Error::Snapshot(format!("{}: {}", self.statement, e)))?;
        Ok(rows_from_result(&result, at))
    }
}

/// Map a diagnostic result onto snapshot rows by column name.
///
/// Accepts both the bracketed who-is-active headings (`dd hh:mm:ss.mss`,
/// `CPU`) and plain snake_case. Missing columns come through as NULL.
pub fn rows_from_result(result: &QueryResult, at: DateTime<Utc>) -> Vec<SnapshotRow> {
    let col = |names: &[&str]| names.iter().find_map(|n| result.column_index(n));

    let session_id = col(&["session_id", "spid"]);
    let elapsed = col(&["dd hh:mm:ss.mss", "dd_hh_mm_ss_mss", "elapsed"]);
    let blocking_session_id = col(&["blocking_session_id", "blocked_by"]);
    let wait_info = col(&["wait_info"]);
    let cpu = col(&["cpu"]);
    let tempdb_allocations = col(&["tempdb_allocations"]);
    let tempdb_current = col(&["tempdb_current"]);
    let reads = col(&["reads"]);
    let writes = col(&["writes"]);
    let physical_reads = col(&["physical_reads"]);
    let used_memory = col(&["used_memory"]);
    let sql_text = col(&["sql_text"]);
    let login_name = col(&["login_name"]);
    let host_name = col(&["host_name"]);
    let database_name = col(&["database_name"]);
    let program_name = col(&["program_name"]);
    let status = col(&["status"]);
    let open_tran_count = col(&["open_tran_count"]);
    let percent_complete = col(&["percent_complete"]);
    let start_time = col(&["start_time"]);
    let login_time = col(&["login_time"]);

    result
        .rows
        .iter()
        .map(|values| {
            let text = |idx: Option<usize>| idx.and_then(|i| values.get(i).cloned().flatten());
            let id = |idx: Option<usize>| text(idx).as_deref().and_then(parse_id);

            SnapshotRow {
                session_id: id(session_id),
                elapsed: text(elapsed),
                blocking_session_id: id(blocking_session_id),
                wait_info: text(wait_info),
                cpu: text(cpu),
                tempdb_allocations: text(tempdb_allocations),
                tempdb_current: text(tempdb_current),
                reads: text(reads),
                writes: text(writes),
                physical_reads: text(physical_reads),
                used_memory: text(used_memory),
                sql_text: text(sql_text),
                login_name: text(login_name),
                host_name: text(host_name),
                database_name: text(database_name),
                program_name: text(program_name),
                status: text(status),
                open_tran_count: text(open_tran_count),
                percent_complete: text(percent_complete),
                start_time: text(start_time),
                login_time: text(login_time),
                collected_at: at,
            }
        })
        .collect()
}

/// Session ids may arrive with thousands separators ("1,024").
fn parse_id(s: &str) -> Option<i64> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    digits.parse().ok()
}
