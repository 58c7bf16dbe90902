//! The collection loop.
//!
//! One run: record an attempt, take the lock, poll the snapshot source a
//! fixed number of times, log everything polled as one batch, release the
//! lock. A run that finds the lock taken stops after recording its attempt.
//!
//! ```text
//! START -> ATTEMPT_RECORDED -+-> LOCK_HELD (skip)
//!                            +-> LOCK_ACQUIRED -> POLLING -> PERSISTING -> RELEASED
//! ```

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::LockStrategy;
use crate::schema::{RecordNumber, SnapshotRow};
use crate::source::SnapshotSource;
use crate::store::{AttemptLedger, LockStore, SnapshotLog};
use crate::{Config, Result};

/// Minutes collected when the caller asks for none (or fewer).
pub const DEFAULT_MINUTES: u32 = 1;

/// Time source for the loop. Everything it reads is whole seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock and a blocking thread sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    /// Snapshots per run.
    pub poll_iterations: u32,
    /// Wait after each snapshot.
    pub poll_interval: Duration,
    /// Also wait after the last snapshot, keeping runs a full minute long.
    pub pause_after_last: bool,
    pub lock_strategy: LockStrategy,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            poll_iterations: 12,
            poll_interval: Duration::from_secs(5),
            pause_after_last: true,
            lock_strategy: LockStrategy::Atomic,
        }
    }
}

impl From<&Config> for CollectOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_iterations: config.poll_iterations,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            pause_after_last: config.pause_after_last,
            lock_strategy: config.lock_strategy,
        }
    }
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run held the lock and logged its batch.
    Collected {
        record_number: RecordNumber,
        rows_polled: usize,
        rows_persisted: usize,
    },
    /// Another collector held the lock; nothing was polled.
    LockHeld {
        record_number: RecordNumber,
        held_since: Option<DateTime<Utc>>,
    },
}

impl RunOutcome {
    pub fn record_number(&self) -> RecordNumber {
        match self {
            RunOutcome::Collected { record_number, .. } => *record_number,
            RunOutcome::LockHeld { record_number, .. } => *record_number,
        }
    }

    pub fn is_collected(&self) -> bool {
        matches!(self, RunOutcome::Collected { .. })
    }
}

/// Outcomes of a multi-minute collection, in run order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<RunOutcome>,
}

impl RunSummary {
    pub fn runs(&self) -> usize {
        self.outcomes.len()
    }

    pub fn collected(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_collected()).count()
    }

    pub fn skipped(&self) -> usize {
        self.runs() - self.collected()
    }

    pub fn rows_persisted(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                RunOutcome::Collected { rows_persisted, .. } => *rows_persisted,
                RunOutcome::LockHeld { .. } => 0,
            })
            .sum()
    }
}

/// Non-positive minute counts fall back to the default.
pub fn normalize_minutes(minutes: i64) -> u32 {
    if minutes <= 0 {
        DEFAULT_MINUTES
    } else {
        u32::try_from(minutes).unwrap_or(u32::MAX)
    }
}

/// Drives collection runs against one target.
pub struct Collector<'a, S, Src> {
    store: &'a S,
    source: &'a Src,
    clock: &'a dyn Clock,
    options: CollectOptions,
    server: String,
}

impl<'a, S, Src> Collector<'a, S, Src>
where
    S: LockStore + AttemptLedger + SnapshotLog,
    Src: SnapshotSource,
{
    /// `server` only names the target in diagnostics.
    pub fn new(store: &'a S, source: &'a Src, clock: &'a dyn Clock, server: impl Into<String>) -> Self {
        Self {
            store,
            source,
            clock,
            options: CollectOptions::default(),
            server: server.into(),
        }
    }

    pub fn with_options(mut self, options: CollectOptions) -> Self {
        self.options = options;
        self
    }

    /// Perform one collection run.
    ///
    /// Finding the lock held is not an error. Any store or source failure
    /// is returned, and a lock taken by this run is released first.
    pub fn run_once(&self) -> Result<RunOutcome> {
        let start_time = self.clock.now();
        let record_number = self.store.record_attempt(start_time)?;

        if !self.take_lock(start_time)? {
            let held_since = self.store.peek().ok().and_then(|s| s.lock_acquired_at);
            warn!(
                server = %self.server,
                record_number,
                held_since = ?held_since,
                "Collection already running on {}; skipping run",
                self.server
            );
            return Ok(RunOutcome::LockHeld {
                record_number,
                held_since,
            });
        }

        info!(server = %self.server, record_number, "Lock acquired; collecting");
        let collected = self.poll_and_persist(record_number, start_time);
        let released = self.store.release();

        match (collected, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                error!(
                    server = %self.server,
                    record_number,
                    "Lock release failed after run error: {}",
                    release_err
                );
                Err(e)
            }
        }
    }

    /// Run once per minute requested. `minutes <= 0` means one run.
    ///
    /// Runs that find the lock held are counted and skipped; the first
    /// error stops the remaining runs.
    pub fn run_for_minutes(&self, minutes: i64) -> Result<RunSummary> {
        let runs = normalize_minutes(minutes);
        let mut summary = RunSummary {
            outcomes: Vec::with_capacity(runs as usize),
        };

        for _ in 0..runs {
            summary.outcomes.push(self.run_once()?);
        }

        info!(
            server = %self.server,
            runs = summary.runs(),
            collected = summary.collected(),
            skipped = summary.skipped(),
            rows = summary.rows_persisted(),
            "Collection finished"
        );
        Ok(summary)
    }

    fn take_lock(&self, at: DateTime<Utc>) -> Result<bool> {
        match self.options.lock_strategy {
            LockStrategy::Atomic => self.store.try_acquire(at),
            LockStrategy::Peek => {
                if self.store.peek()?.is_held() {
                    return Ok(false);
                }
                self.store.acquire(at)?;
                Ok(true)
            }
        }
    }

    fn poll_and_persist(&self, record_number: RecordNumber, start_time: DateTime<Utc>) -> Result<RunOutcome> {
        let iterations = self.options.poll_iterations;
        let mut accumulated: Vec<SnapshotRow> = Vec::new();

        for iteration in 1..=iterations {
            let rows = self.source.snapshot(self.clock.now())?;
            debug!(record_number, iteration, rows = rows.len(), "Snapshot taken");
            accumulated.extend(rows);

            if iteration < iterations || self.options.pause_after_last {
                self.clock.sleep(self.options.poll_interval);
            }
        }

        let rows_persisted = self
            .store
            .append_batch(record_number, start_time, &accumulated)?;
        info!(
            record_number,
            polled = accumulated.len(),
            persisted = rows_persisted,
            "Batch logged"
        );

        Ok(RunOutcome::Collected {
            record_number,
            rows_polled: accumulated.len(),
            rows_persisted,
        })
    }
}
