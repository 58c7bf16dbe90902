//! Run-attempt ledger operations.
//!
//! Every collection run appends one attempt before it looks at the lock,
//! so the ledger is a complete audit of runs, including the ones that
//! found the lock taken.

use chrono::{DateTime, Utc};
use duckdb::params;

use super::{missing_table, AttemptLedger, Store};
use crate::schema::{format_timestamp, parse_timestamp, AttemptSummary, RecordNumber};
use crate::{Error, Result};

impl AttemptLedger for Store {
    fn record_attempt(&self, at: DateTime<Utc>) -> Result<RecordNumber> {
        let conn = self.connection()?;
        conn.query_row(
            "INSERT INTO run_attempts (failure_time) VALUES (CAST(? AS TIMESTAMP)) RETURNING record_number",
            params![format_timestamp(&at)],
            |row| row.get(0),
        )
        .map_err(|e| missing_table(e, "run_attempts"))
    }

    fn find_identifier_for(&self, at: DateTime<Utc>) -> Result<Option<RecordNumber>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT max(record_number) FROM run_attempts WHERE failure_time = CAST(? AS TIMESTAMP)",
            params![format_timestamp(&at)],
            |row| row.get(0),
        )
        .map_err(|e| missing_table(e, "run_attempts"))
    }
}

impl Store {
    /// Get the count of attempts in the ledger.
    pub fn attempt_count(&self) -> Result<i64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM run_attempts", [], |row| row.get(0))
            .map_err(|e| missing_table(e, "run_attempts"))
    }

    /// Most recent attempts first, with the number of rows each one logged.
    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<AttemptSummary>> {
        let conn = self.connection()?;

        let sql = format!(
            r#"
            SELECT
                a.record_number,
                a.failure_time::VARCHAR,
                COUNT(s.record_number) AS rows_logged
            FROM run_attempts a
            LEFT JOIN snapshot_log s ON s.record_number = a.record_number
            GROUP BY a.record_number, a.failure_time
            ORDER BY a.record_number DESC
            LIMIT {}
            "#,
            limit
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| missing_table(e, "run_attempts"))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, RecordNumber>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (record_number, failure_time, rows_logged) = row?;
            let failure_time = parse_timestamp(&failure_time).ok_or_else(|| {
                Error::Storage(format!(
                    "attempt {} has unreadable failure_time '{}'",
                    record_number, failure_time
                ))
            })?;
            results.push(AttemptSummary {
                record_number,
                failure_time,
                rows_logged,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_store;
    use super::super::SnapshotLog;
    use super::*;
    use crate::schema::SnapshotRow;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn test_record_numbers_increase() {
        let (_tmp, store) = setup_store();

        let first = store.record_attempt(at(0)).unwrap();
        let second = store.record_attempt(at(1)).unwrap();
        let third = store.record_attempt(at(1)).unwrap();

        assert!(first < second);
        assert!(second < third);
        assert_eq!(store.attempt_count().unwrap(), 3);
    }

    #[test]
    fn test_find_identifier_for() {
        let (_tmp, store) = setup_store();

        let early = store.record_attempt(at(0)).unwrap();
        store.record_attempt(at(30)).unwrap();

        assert_eq!(store.find_identifier_for(at(0)).unwrap(), Some(early));
        assert_eq!(store.find_identifier_for(at(59)).unwrap(), None);
    }

    #[test]
    fn test_find_identifier_same_second_picks_latest() {
        let (_tmp, store) = setup_store();

        store.record_attempt(at(7)).unwrap();
        let latest = store.record_attempt(at(7)).unwrap();

        // Two runs in one second collapse onto the newer attempt
        assert_eq!(store.find_identifier_for(at(7)).unwrap(), Some(latest));
    }

    #[test]
    fn test_recent_attempts_with_row_counts() {
        let (_tmp, store) = setup_store();

        let blocked = store.record_attempt(at(0)).unwrap();
        let collected = store.record_attempt(at(1)).unwrap();
        let rows = vec![
            SnapshotRow::new(at(2)).with_sql_text("SELECT 1"),
            SnapshotRow::new(at(3)).with_sql_text("SELECT 2"),
        ];
        store.append_batch(collected, at(1), &rows).unwrap();

        let attempts = store.recent_attempts(10).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].record_number, collected);
        assert_eq!(attempts[0].failure_time, at(1));
        assert_eq!(attempts[0].rows_logged, 2);
        assert_eq!(attempts[1].record_number, blocked);
        assert_eq!(attempts[1].rows_logged, 0);

        assert_eq!(store.recent_attempts(1).unwrap().len(), 1);
    }

    #[test]
    fn test_ledger_missing_table() {
        let (_tmp, store) = setup_store();
        store
            .connection()
            .unwrap()
            .execute_batch("DROP TABLE run_attempts")
            .unwrap();

        let err = store.record_attempt(at(0)).unwrap_err();
        assert!(matches!(err, Error::NotProvisioned(_)));
    }

    #[test]
    fn test_unreadable_failure_time_is_an_error() {
        let (_tmp, store) = setup_store();
        store
            .connection()
            .unwrap()
            .execute_batch(
                "DROP TABLE run_attempts;
                 CREATE TABLE run_attempts (record_number BIGINT PRIMARY KEY, failure_time VARCHAR NOT NULL);
                 INSERT INTO run_attempts VALUES (1, 'not a time');",
            )
            .unwrap();

        let err = store.recent_attempts(10).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("not a time"));
    }
}
