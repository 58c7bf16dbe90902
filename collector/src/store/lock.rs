//! Collector lock operations.
//!
//! The lock is the single row of `collector_lock`. There is no lease: a
//! collector killed mid-run leaves the row held until someone releases it.

use chrono::{DateTime, Utc};
use duckdb::params;

use super::{missing_table, LockStore, Store};
use crate::schema::{format_timestamp, parse_timestamp, LockState, LOCK_HELD, LOCK_IDLE};
use crate::{Error, Result};

fn lock_row_missing() -> Error {
    Error::NotProvisioned("collector_lock has no row; run `wiac init`".to_string())
}

impl LockStore for Store {
    fn peek(&self) -> Result<LockState> {
        let conn = self.connection()?;
        let result = conn.query_row(
            "SELECT running, lock_acquired_at::VARCHAR FROM collector_lock WHERE id = 1",
            [],
            |row| Ok((row.get::<_, i32>(0)?, row.get::<_, Option<String>>(1)?)),
        );

        match result {
            Ok((running, acquired_at)) => {
                let lock_acquired_at = match acquired_at {
                    Some(text) => Some(parse_timestamp(&text).ok_or_else(|| {
                        Error::Storage(format!("unreadable lock_acquired_at '{}'", text))
                    })?),
                    None => None,
                };
                Ok(LockState {
                    running,
                    lock_acquired_at,
                })
            }
            Err(duckdb::Error::QueryReturnedNoRows) => Err(lock_row_missing()),
            Err(e) => Err(missing_table(e, "collector_lock")),
        }
    }

    fn acquire(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE collector_lock SET running = ?, lock_acquired_at = CAST(? AS TIMESTAMP) WHERE id = 1",
                params![LOCK_HELD, format_timestamp(&at)],
            )
            .map_err(|e| missing_table(e, "collector_lock"))?;

        if changed == 0 {
            return Err(lock_row_missing());
        }
        Ok(())
    }

    fn try_acquire(&self, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.connection()?;
        let result = conn.execute(
            "UPDATE collector_lock SET running = ?, lock_acquired_at = CAST(? AS TIMESTAMP) \
             WHERE id = 1 AND running = ?",
            params![LOCK_HELD, format_timestamp(&at), LOCK_IDLE],
        );

        match result {
            Ok(1) => Ok(true),
            // Nothing matched: either the lock is held or the row is gone
            Ok(_) => self.peek().map(|_| false),
            // Another writer updated the row first
            Err(e) if e.to_string().contains("Conflict") => Ok(false),
            Err(e) => Err(missing_table(e, "collector_lock")),
        }
    }

    fn release(&self) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE collector_lock SET running = ? WHERE id = 1",
                params![LOCK_IDLE],
            )
            .map_err(|e| missing_table(e, "collector_lock"))?;

        if changed == 0 {
            return Err(lock_row_missing());
        }
        Ok(())
    }
}
