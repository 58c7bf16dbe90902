//! Record definitions for the collector tables.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the run-attempt ledger.
pub type RecordNumber = i64;

/// Lock flag value when no collector holds the lock.
pub const LOCK_IDLE: i32 = 0;

/// Lock flag value while a collector is polling.
pub const LOCK_HELD: i32 = -1;

/// Storage format for every timestamp column (UTC, whole seconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way the tables store it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Fractional seconds are tolerated.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Current state of the single lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    /// `0` when idle, `-1` while held.
    pub running: i32,

    /// When the lock was last taken.
    pub lock_acquired_at: Option<DateTime<Utc>>,
}

impl LockState {
    pub fn idle() -> Self {
        Self {
            running: LOCK_IDLE,
            lock_acquired_at: None,
        }
    }

    /// Anything other than idle counts as held.
    pub fn is_held(&self) -> bool {
        self.running != LOCK_IDLE
    }
}

/// One ledger entry together with how many rows its run logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub record_number: RecordNumber,
    pub failure_time: DateTime<Utc>,
    pub rows_logged: i64,
}

/// One session as reported by the diagnostic view at one instant.
///
/// Counters and times are kept as the text the view produced; only the
/// session ids are parsed, since they are what operators join on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub session_id: Option<i64>,

    /// Elapsed time, `dd hh:mm:ss.mss`.
    pub elapsed: Option<String>,

    pub blocking_session_id: Option<i64>,
    pub wait_info: Option<String>,
    pub cpu: Option<String>,
    pub tempdb_allocations: Option<String>,
    pub tempdb_current: Option<String>,
    pub reads: Option<String>,
    pub writes: Option<String>,
    pub physical_reads: Option<String>,
    pub used_memory: Option<String>,
    pub sql_text: Option<String>,
    pub login_name: Option<String>,
    pub host_name: Option<String>,
    pub database_name: Option<String>,
    pub program_name: Option<String>,
    pub status: Option<String>,
    pub open_tran_count: Option<String>,
    pub percent_complete: Option<String>,
    pub start_time: Option<String>,
    pub login_time: Option<String>,

    /// When the poll that produced this row ran.
    pub collected_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// Create an empty row stamped with its collection time.
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            session_id: None,
            elapsed: None,
            blocking_session_id: None,
            wait_info: None,
            cpu: None,
            tempdb_allocations: None,
            tempdb_current: None,
            reads: None,
            writes: None,
            physical_reads: None,
            used_memory: None,
            sql_text: None,
            login_name: None,
            host_name: None,
            database_name: None,
            program_name: None,
            status: None,
            open_tran_count: None,
            percent_complete: None,
            start_time: None,
            login_time: None,
            collected_at,
        }
    }

    pub fn with_session_id(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_sql_text(mut self, sql_text: impl Into<String>) -> Self {
        self.sql_text = Some(sql_text.into());
        self
    }

    /// True when the SQL text belongs to the server's own diagnostics.
    pub fn is_self_monitoring(&self, markers: &[String]) -> bool {
        let Some(text) = self.sql_text.as_deref() else {
            return false;
        };
        let text = text.to_lowercase();
        markers
            .iter()
            .filter(|m| !m.is_empty())
            .any(|m| text.contains(&m.to_lowercase()))
    }

    /// True when the row is the collector's own snapshot statement.
    pub fn is_own_snapshot(&self, statement: &str) -> bool {
        let statement = statement.trim().trim_end_matches(';').trim();
        match self.sql_text.as_deref() {
            Some(text) if !statement.is_empty() => text
                .trim()
                .trim_end_matches(';')
                .trim()
                .eq_ignore_ascii_case(statement),
            _ => false,
        }
    }

    /// Rows without SQL text or from self-monitoring are not logged.
    pub fn is_loggable(&self, markers: &[String]) -> bool {
        self.sql_text.is_some() && !self.is_self_monitoring(markers)
    }
}
