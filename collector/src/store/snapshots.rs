//! Snapshot log operations.

use chrono::{DateTime, Utc};
use duckdb::{params, Connection};

use super::{missing_table, LogOrder, QueryResult, SnapshotLog, Store};
use crate::schema::{format_timestamp, RecordNumber, SnapshotRow};
use crate::Result;

/// Columns returned by [`Store::query_log`], in table order.
const LOG_COLUMNS: &str = "record_number, collection_batch_time, session_id, elapsed, \
    blocking_session_id, wait_info, cpu, tempdb_allocations, tempdb_current, reads, writes, \
    physical_reads, used_memory, sql_text, login_name, host_name, database_name, program_name, \
    status, open_tran_count, percent_complete, start_time, login_time, row_collected_at";

impl SnapshotLog for Store {
    /// Rows without SQL text, rows matching a self-monitor marker and the
    /// collector's own snapshot statement are dropped first. The rest go in as one transaction, so a failed batch
    /// leaves nothing behind.
    fn append_batch(
        &self,
        record_number: RecordNumber,
        batch_time: DateTime<Utc>,
        rows: &[SnapshotRow],
    ) -> Result<usize> {
        let markers = &self.config.self_monitor_markers;
        let own_statement = &self.config.snapshot_query;
        let loggable: Vec<&SnapshotRow> = rows
            .iter()
            .filter(|r| r.is_loggable(markers) && !r.is_own_snapshot(own_statement))
            .collect();

        if loggable.is_empty() {
            return Ok(0);
        }

        let conn = self.connection()?;
        conn.execute("BEGIN TRANSACTION", [])?;

        match insert_rows(&conn, record_number, batch_time, &loggable) {
            Ok(written) => {
                conn.execute("COMMIT", [])?;
                Ok(written)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

fn insert_rows(
    conn: &Connection,
    record_number: RecordNumber,
    batch_time: DateTime<Utc>,
    rows: &[&SnapshotRow],
) -> Result<usize> {
    let sql = format!(
        "INSERT INTO snapshot_log ({}) VALUES (?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
        LOG_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| missing_table(e, "snapshot_log"))?;
    let batch_time = format_timestamp(&batch_time);

    for row in rows {
        stmt.execute(params![
            record_number,
            batch_time,
            row.session_id,
            row.elapsed,
            row.blocking_session_id,
            row.wait_info,
            row.cpu,
            row.tempdb_allocations,
            row.tempdb_current,
            row.reads,
            row.writes,
            row.physical_reads,
            row.used_memory,
            row.sql_text,
            row.login_name,
            row.host_name,
            row.database_name,
            row.program_name,
            row.status,
            row.open_tran_count,
            row.percent_complete,
            row.start_time,
            row.login_time,
            format_timestamp(&row.collected_at),
        ])?;
    }

    Ok(rows.len())
}

impl Store {
    /// Read the snapshot log in run order.
    pub fn query_log(&self, order: LogOrder, limit: Option<usize>) -> Result<QueryResult> {
        let dir = order.sql();
        let mut sql = format!(
            "SELECT {} FROM snapshot_log ORDER BY record_number {dir}, row_collected_at {dir}, session_id {dir}",
            LOG_COLUMNS,
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        self.query(&sql).map_err(|e| match e {
            crate::Error::DuckDb(e) => missing_table(e, "snapshot_log"),
            other => other,
        })
    }

    /// Get the count of logged snapshot rows.
    pub fn snapshot_count(&self) -> Result<i64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM snapshot_log", [], |row| row.get(0))
            .map_err(|e| missing_table(e, "snapshot_log"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_store;
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, secs).unwrap()
    }

    fn session(id: i64, secs: u32, text: &str) -> SnapshotRow {
        let mut row = SnapshotRow::new(at(secs))
            .with_session_id(id)
            .with_sql_text(text);
        row.login_name = Some("app_user".to_string());
        row.status = Some("running".to_string());
        row
    }

    #[test]
    fn test_append_batch_persists_rows() {
        let (_tmp, store) = setup_store();
        let rows = vec![
            session(51, 1, "SELECT * FROM orders"),
            session(52, 1, "UPDATE stock SET qty = qty - 1"),
            session(51, 6, "SELECT * FROM orders"),
        ];

        let written = store.append_batch(7, at(0), &rows).unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.snapshot_count().unwrap(), 3);

        let log = store.query_log(LogOrder::Ascending, None).unwrap();
        let rn = log.column_index("record_number").unwrap();
        let batch = log.column_index("collection_batch_time").unwrap();
        let collected = log.column_index("row_collected_at").unwrap();
        let login = log.column_index("login_name").unwrap();

        for row in &log.rows {
            assert_eq!(row[rn].as_deref(), Some("7"));
            assert_eq!(row[batch].as_deref(), Some("2024-06-01 12:00:00"));
            assert_eq!(row[login].as_deref(), Some("app_user"));
        }
        assert_eq!(log.rows[0][collected].as_deref(), Some("2024-06-01 12:00:01"));
        assert_eq!(log.rows[2][collected].as_deref(), Some("2024-06-01 12:00:06"));
    }

    #[test]
    fn test_append_batch_filters_noise() {
        let (_tmp, store) = setup_store();
        let rows = vec![
            session(51, 1, "SELECT 1"),
            session(1, 1, "exec sp_server_diagnostics 5"),
            SnapshotRow::new(at(1)).with_session_id(60),
            session(52, 1, "SELECT 2"),
        ];

        let written = store.append_batch(1, at(0), &rows).unwrap();
        assert_eq!(written, 2);
        assert!(written < rows.len());

        let log = store.query_log(LogOrder::Ascending, None).unwrap();
        let text = log.column_index("sql_text").unwrap();
        let texts: Vec<_> = log.rows.iter().map(|r| r[text].clone().unwrap()).collect();
        assert_eq!(texts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_append_batch_skips_own_snapshot_statement() {
        let (_tmp, store) = setup_store();
        let own = store.config().snapshot_query.clone();
        let rows = vec![session(1, 1, &own), session(52, 1, "SELECT 2")];

        assert_eq!(store.append_batch(1, at(0), &rows).unwrap(), 1);

        let log = store.query_log(LogOrder::Ascending, None).unwrap();
        let text = log.column_index("sql_text").unwrap();
        assert_eq!(log.rows[0][text].as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn test_append_batch_empty_is_noop() {
        let (_tmp, store) = setup_store();
        assert_eq!(store.append_batch(1, at(0), &[]).unwrap(), 0);

        let all_noise = vec![
            session(1, 1, "sp_server_diagnostics"),
            SnapshotRow::new(at(1)),
        ];
        assert_eq!(store.append_batch(1, at(0), &all_noise).unwrap(), 0);
        assert_eq!(store.snapshot_count().unwrap(), 0);
    }

    #[test]
    fn test_empty_batch_needs_no_table() {
        let (_tmp, store) = setup_store();
        store
            .connection()
            .unwrap()
            .execute_batch("DROP TABLE snapshot_log")
            .unwrap();

        // The early exit never touches the database
        assert_eq!(store.append_batch(1, at(0), &[]).unwrap(), 0);
        assert!(store
            .append_batch(1, at(0), &[session(5, 1, "SELECT 1")])
            .is_err());
    }

    #[test]
    fn test_failed_batch_leaves_no_rows() {
        let (_tmp, store) = setup_store();
        // Same shape, but refuse rows without a session id
        store
            .connection()
            .unwrap()
            .execute_batch(
                r#"
                DROP TABLE snapshot_log;
                CREATE TABLE snapshot_log (
                    record_number BIGINT NOT NULL,
                    collection_batch_time TIMESTAMP NOT NULL,
                    session_id BIGINT NOT NULL,
                    elapsed VARCHAR, blocking_session_id BIGINT, wait_info VARCHAR,
                    cpu VARCHAR, tempdb_allocations VARCHAR, tempdb_current VARCHAR,
                    reads VARCHAR, writes VARCHAR, physical_reads VARCHAR, used_memory VARCHAR,
                    sql_text VARCHAR, login_name VARCHAR, host_name VARCHAR,
                    database_name VARCHAR, program_name VARCHAR, status VARCHAR,
                    open_tran_count VARCHAR, percent_complete VARCHAR, start_time VARCHAR,
                    login_time VARCHAR, row_collected_at TIMESTAMP NOT NULL
                );
                "#,
            )
            .unwrap();

        let rows = vec![
            session(1, 1, "SELECT 1"),
            SnapshotRow::new(at(1)).with_sql_text("SELECT 2"),
            session(3, 1, "SELECT 3"),
        ];
        assert!(store.append_batch(1, at(0), &rows).is_err());
        assert_eq!(store.snapshot_count().unwrap(), 0);
    }

    #[test]
    fn test_query_log_order_and_limit() {
        let (_tmp, store) = setup_store();
        store
            .append_batch(1, at(0), &[session(51, 1, "SELECT 'first'")])
            .unwrap();
        store
            .append_batch(2, at(10), &[session(51, 11, "SELECT 'second'")])
            .unwrap();

        let asc = store.query_log(LogOrder::Ascending, None).unwrap();
        let desc = store.query_log(LogOrder::Descending, Some(1)).unwrap();
        let rn = asc.column_index("record_number").unwrap();

        assert_eq!(asc.rows.len(), 2);
        assert_eq!(asc.rows[0][rn].as_deref(), Some("1"));
        assert_eq!(desc.rows.len(), 1);
        assert_eq!(desc.rows[0][rn].as_deref(), Some("2"));
    }
}
