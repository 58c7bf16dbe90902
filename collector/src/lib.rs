//! WIAC: Who-Is-Active Collector
//!
//! Samples a "who is active" diagnostic view at a fixed cadence and keeps
//! the samples in a DuckDB log, guarded by a single-row advisory lock.

pub mod collect;
pub mod config;
pub mod credentials;
pub mod error;
pub mod init;
pub mod schema;
pub mod source;
pub mod store;

pub use collect::{Clock, CollectOptions, Collector, RunOutcome, RunSummary, SystemClock};
pub use config::{Config, LockStrategy};
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use schema::{AttemptSummary, LockState, RecordNumber, SnapshotRow};
pub use source::{SnapshotSource, SqlSnapshotSource};
pub use store::{AttemptLedger, LockStore, LogOrder, QueryResult, SnapshotLog, Store};
