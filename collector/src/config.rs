//! Configuration for the collector.
//!
//! WIAC_ROOT resolution order:
//! 1. Explicit path passed to Config::with_root()
//! 2. WIAC_ROOT environment variable
//! 3. Default: ~/.local/share/wiac

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::{Error, Result};

/// How a run decides whether it owns the collector lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// Single conditional update that flips the lock only when idle.
    #[default]
    Atomic,
    /// Read the flag, then write it. Two collectors can both win.
    Peek,
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStrategy::Atomic => write!(f, "atomic"),
            LockStrategy::Peek => write!(f, "peek"),
        }
    }
}

impl FromStr for LockStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "atomic" | "cas" => Ok(LockStrategy::Atomic),
            "peek" | "peek-then-acquire" => Ok(LockStrategy::Peek),
            _ => Err(Error::Config(format!(
                "Invalid lock strategy '{}': expected 'atomic' or 'peek'",
                s
            ))),
        }
    }
}

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for collector state.
    pub wiac_root: PathBuf,

    /// Name of the target server, used in diagnostics.
    #[serde(default = "default_server")]
    pub server: String,

    /// Target database file. Defaults to WIAC_ROOT/db/wiac.duckdb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Snapshots taken per run.
    #[serde(default = "default_poll_iterations")]
    pub poll_iterations: u32,

    /// Seconds to wait after each snapshot.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Whether to wait after the last snapshot of a run as well.
    #[serde(default = "default_pause_after_last")]
    pub pause_after_last: bool,

    #[serde(default)]
    pub lock_strategy: LockStrategy,

    /// Diagnostic statement executed for every snapshot.
    #[serde(default = "default_snapshot_query")]
    pub snapshot_query: String,

    /// SQL text fragments identifying the server's own diagnostic traffic.
    /// Matching rows are never logged.
    #[serde(default = "default_self_monitor_markers")]
    pub self_monitor_markers: Vec<String>,

    /// Minutes collected by `wiac collect` when none are given.
    #[serde(default = "default_minutes")]
    pub default_minutes: u32,
}

fn default_server() -> String {
    // Deterministic: username@hostname
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let hostname = gethostname::gethostname()
        .to_string_lossy()
        .to_string();
    format!("{}@{}", username, hostname)
}

fn default_poll_iterations() -> u32 {
    12
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_pause_after_last() -> bool {
    true
}

pub fn default_snapshot_query() -> String {
    "SELECT * FROM who_is_active".to_string()
}

fn default_self_monitor_markers() -> Vec<String> {
    vec!["sp_server_diagnostics".to_string()]
}

fn default_minutes() -> u32 {
    1
}

impl Config {
    /// Create a new config with the given WIAC_ROOT.
    pub fn with_root(wiac_root: impl Into<PathBuf>) -> Self {
        Self {
            wiac_root: wiac_root.into(),
            server: default_server(),
            database: None,
            poll_iterations: default_poll_iterations(),
            poll_interval_secs: default_poll_interval_secs(),
            pause_after_last: default_pause_after_last(),
            lock_strategy: LockStrategy::default(),
            snapshot_query: default_snapshot_query(),
            self_monitor_markers: default_self_monitor_markers(),
            default_minutes: default_minutes(),
        }
    }

    /// Create a config using default WIAC_ROOT resolution.
    pub fn default_location() -> Result<Self> {
        let wiac_root = resolve_wiac_root()?;
        Ok(Self::with_root(wiac_root))
    }

    /// Load config from WIAC_ROOT/config.toml, or create default.
    pub fn load() -> Result<Self> {
        let wiac_root = resolve_wiac_root()?;
        Self::load_from(&wiac_root)
    }

    /// Load config from a specific WIAC_ROOT.
    pub fn load_from(wiac_root: &Path) -> Result<Self> {
        let config_path = wiac_root.join("config.toml");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
            // Ensure wiac_root matches the actual location
            config.wiac_root = wiac_root.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::with_root(wiac_root))
        }
    }

    /// Save config to WIAC_ROOT/config.toml.
    pub fn save(&self) -> Result<()> {
        let config_path = self.wiac_root.join("config.toml");
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_path, contents)?;
        Ok(())
    }

    /// Point this config at the target named by `credentials`.
    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        self.server = credentials.server.clone();
        self.database = Some(credentials.database.clone());
    }

    /// Path to the DuckDB database file.
    pub fn db_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.wiac_root.join("db/wiac.duckdb"))
    }
}

/// Resolve WIAC_ROOT using the standard resolution order.
fn resolve_wiac_root() -> Result<PathBuf> {
    // 1. Environment variable
    if let Ok(path) = std::env::var("WIAC_ROOT") {
        return Ok(PathBuf::from(path));
    }

    // 2. XDG data directory (via directories crate)
    if let Some(proj_dirs) = ProjectDirs::from("", "", "wiac") {
        return Ok(proj_dirs.data_dir().to_path_buf());
    }

    // 3. Fallback to ~/.local/share/wiac
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share/wiac"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_with_root() {
        let config = Config::with_root("/tmp/test-wiac");
        assert_eq!(config.wiac_root, PathBuf::from("/tmp/test-wiac"));
        assert_eq!(config.poll_iterations, 12);
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.pause_after_last);
        assert_eq!(config.lock_strategy, LockStrategy::Atomic);
        assert_eq!(config.self_monitor_markers, vec!["sp_server_diagnostics"]);
    }

    #[test]
    fn test_db_path_default_and_override() {
        let mut config = Config::with_root("/tmp/test-wiac");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/test-wiac/db/wiac.duckdb"));

        config.apply_credentials(&Credentials {
            server: "prod-sql-01".to_string(),
            database: PathBuf::from("/srv/monitor.duckdb"),
        });
        assert_eq!(config.server, "prod-sql-01");
        assert_eq!(config.db_path(), PathBuf::from("/srv/monitor.duckdb"));
    }

    #[test]
    fn test_lock_strategy_parse() {
        assert_eq!("atomic".parse::<LockStrategy>().unwrap(), LockStrategy::Atomic);
        assert_eq!("PEEK".parse::<LockStrategy>().unwrap(), LockStrategy::Peek);
        assert!("mutex".parse::<LockStrategy>().is_err());
        assert_eq!(LockStrategy::Peek.to_string(), "peek");
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let wiac_root = tmp.path().to_path_buf();

        let mut config = Config::with_root(&wiac_root);
        config.poll_iterations = 10;
        config.pause_after_last = false;
        config.lock_strategy = LockStrategy::Peek;
        config.save().unwrap();

        let loaded = Config::load_from(&wiac_root).unwrap();
        assert_eq!(loaded.poll_iterations, 10);
        assert!(!loaded.pause_after_last);
        assert_eq!(loaded.lock_strategy, LockStrategy::Peek);
        assert_eq!(loaded.snapshot_query, config.snapshot_query);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "wiac_root = \"/elsewhere\"\nserver = \"db01\"\n",
        )
        .unwrap();

        let loaded = Config::load_from(tmp.path()).unwrap();
        assert_eq!(loaded.wiac_root, tmp.path());
        assert_eq!(loaded.server, "db01");
        assert_eq!(loaded.poll_iterations, 12);
        assert_eq!(loaded.default_minutes, 1);
    }
}
