//! Store - the lock row, run-attempt ledger and snapshot log.
//!
//! All three live in one DuckDB database. The collector talks to them
//! through the [`LockStore`], [`AttemptLedger`] and [`SnapshotLog`] traits
//! so the orchestration loop can be exercised without a database.

mod attempts;
mod lock;
mod snapshots;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use duckdb::{
    types::{TimeUnit, ValueRef},
    Connection,
};

use crate::schema::{LockState, RecordNumber, SnapshotRow};
use crate::{Config, Error, Result};

/// Access to the single-row advisory lock.
pub trait LockStore {
    /// Read the lock without changing it.
    fn peek(&self) -> Result<LockState>;

    /// Mark the lock held, whatever its current state.
    fn acquire(&self, at: DateTime<Utc>) -> Result<()>;

    /// Take the lock only if it is idle. Returns whether this caller took it.
    fn try_acquire(&self, at: DateTime<Utc>) -> Result<bool>;

    /// Mark the lock idle, whatever its current state.
    fn release(&self) -> Result<()>;
}

/// Append-only log of collection attempts.
pub trait AttemptLedger {
    /// Append an attempt started at `at` and return its record number.
    fn record_attempt(&self, at: DateTime<Utc>) -> Result<RecordNumber>;

    /// Most recent attempt whose start time equals `at`.
    ///
    /// Start times have one-second resolution, so two runs started in the
    /// same second cannot be told apart here. Prefer the number returned
    /// by [`AttemptLedger::record_attempt`].
    fn find_identifier_for(&self, at: DateTime<Utc>) -> Result<Option<RecordNumber>>;
}

/// Append-only log of snapshot rows.
pub trait SnapshotLog {
    /// Persist the loggable rows of one batch. Returns how many were written.
    fn append_batch(
        &self,
        record_number: RecordNumber,
        batch_time: DateTime<Utc>,
        rows: &[SnapshotRow],
    ) -> Result<usize>;
}

/// Sort direction for reading the snapshot log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOrder {
    #[default]
    Ascending,
    Descending,
}

impl LogOrder {
    fn sql(&self) -> &'static str {
        match self {
            LogOrder::Ascending => "ASC",
            LogOrder::Descending => "DESC",
        }
    }
}

impl fmt::Display for LogOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOrder::Ascending => write!(f, "asc"),
            LogOrder::Descending => write!(f, "desc"),
        }
    }
}

impl FromStr for LogOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(LogOrder::Ascending),
            "desc" | "descending" => Ok(LogOrder::Descending),
            _ => Err(Error::Config(format!(
                "Invalid order '{}': expected 'asc' or 'desc'",
                s
            ))),
        }
    }
}

/// Result of an ad-hoc query. `None` is SQL NULL.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, val)| {
                        let val = match val {
                            Some(v) => serde_json::Value::String(v.clone()),
                            None => serde_json::Value::Null,
                        };
                        (col.clone(), val)
                    })
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect()
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// A collector store bound to one DuckDB database.
pub struct Store {
    config: Config,
    conn: Connection,
}

impl Store {
    /// Open an existing database.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = config.db_path();
        if !db_path.exists() {
            return Err(Error::NotInitialized(db_path));
        }
        let conn = Connection::open(&db_path)?;
        Ok(Self { config, conn })
    }

    /// Open the database, creating the file if needed.
    pub fn create(config: Config) -> Result<Self> {
        if let Some(parent) = config.db_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(config.db_path())?;
        Ok(Self { config, conn })
    }

    /// A second handle on the same database, usable from another thread.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            config: self.config.clone(),
            conn: self.conn.try_clone()?,
        })
    }

    /// Get a DuckDB connection to the store.
    pub fn connection(&self) -> Result<Connection> {
        Ok(self.conn.try_clone()?)
    }

    /// Get config reference.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute arbitrary SQL and materialize the result.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows_iter = stmt.query([])?;

        let column_count = rows_iter.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = match rows_iter.as_ref() {
            Some(stmt) => (0..column_count)
                .map(|i| {
                    stmt.column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{}", i))
                })
                .collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        while let Some(row) = rows_iter.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_to_string(row.get_ref(i)?));
            }
            rows.push(values);
        }

        Ok(QueryResult { columns, rows })
    }
}

/// Render one DuckDB value as text, keeping NULL distinct.
fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    let text = match value {
        ValueRef::Null => return None,
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(n) => n.to_string(),
        ValueRef::SmallInt(n) => n.to_string(),
        ValueRef::Int(n) => n.to_string(),
        ValueRef::BigInt(n) => n.to_string(),
        ValueRef::HugeInt(n) => n.to_string(),
        ValueRef::UTinyInt(n) => n.to_string(),
        ValueRef::USmallInt(n) => n.to_string(),
        ValueRef::UInt(n) => n.to_string(),
        ValueRef::UBigInt(n) => n.to_string(),
        ValueRef::Float(f) => f.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Timestamp(unit, val) => DateTime::<Utc>::from_timestamp_micros(to_micros(unit, val))
            .map(|dt| crate::schema::format_timestamp(&dt))
            .unwrap_or_else(|| format!("<invalid timestamp {}>", val)),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days as i64)))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| format!("<invalid date {}>", days)),
        ValueRef::Time64(unit, val) => {
            let micros = to_micros(unit, val);
            let secs = (micros / 1_000_000) as u32;
            let nanos = (micros % 1_000_000) as u32 * 1_000;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| format!("<invalid time {}>", val))
        }
        ValueRef::Interval { months, days, nanos } => {
            format!("{} months {} days {} ns", months, days, nanos)
        }
        ValueRef::Text(s) => String::from_utf8_lossy(s).to_string(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
        _ => "<complex>".to_string(),
    };
    Some(text)
}

fn to_micros(unit: TimeUnit, val: i64) -> i64 {
    match unit {
        TimeUnit::Second => val * 1_000_000,
        TimeUnit::Millisecond => val * 1_000,
        TimeUnit::Microsecond => val,
        TimeUnit::Nanosecond => val / 1_000,
    }
}

/// Turn "table does not exist" into a provisioning error naming the table.
pub(crate) fn missing_table(e: duckdb::Error, table: &str) -> Error {
    if e.to_string().contains("does not exist") {
        Error::NotProvisioned(format!("table {} does not exist; run `wiac init`", table))
    } else {
        Error::DuckDb(e)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_store;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_uninitialized() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        let err = Store::open(config).err().unwrap();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[test]
    fn test_query_keeps_nulls() {
        let (_tmp, store) = setup_store();
        let result = store
            .query("SELECT 42 AS answer, NULL::VARCHAR AS nothing, 'x' AS letter")
            .unwrap();
        assert_eq!(result.columns, vec!["answer", "nothing", "letter"]);
        assert_eq!(
            result.rows,
            vec![vec![Some("42".to_string()), None, Some("x".to_string())]]
        );
        assert_eq!(result.column_index("LETTER"), Some(2));
    }

    #[test]
    fn test_query_formats_timestamps() {
        let (_tmp, store) = setup_store();
        let result = store
            .query("SELECT TIMESTAMP '2024-01-02 03:04:05' AS ts")
            .unwrap();
        assert_eq!(result.rows[0][0].as_deref(), Some("2024-01-02 03:04:05"));
    }

    #[test]
    fn test_to_json_rows() {
        let result = QueryResult {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![Some("1".to_string()), None]],
        };
        let json = result.to_json_rows();
        assert_eq!(json[0]["a"], "1");
        assert!(json[0]["b"].is_null());
    }

    #[test]
    fn test_log_order_parse() {
        assert_eq!("asc".parse::<LogOrder>().unwrap(), LogOrder::Ascending);
        assert_eq!("DESC".parse::<LogOrder>().unwrap(), LogOrder::Descending);
        assert!("sideways".parse::<LogOrder>().is_err());
    }
}
