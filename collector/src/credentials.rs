//! Target resolution from connection strings.
//!
//! Accepts the familiar `Key=Value;Key=Value` form. Keys are matched
//! case-insensitively and surrounding whitespace is ignored:
//!
//! - `Server` / `Data Source` / `Host` - name reported in diagnostics
//! - `Database` / `Initial Catalog` / `Path` - DuckDB database file
//!
//! Unknown keys (user, password, timeouts) are accepted and ignored since
//! a local database file needs none of them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Config, Error, Result};

/// The server/database pair every store call is made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub server: String,
    pub database: PathBuf,
}

impl Credentials {
    /// Parse a `Server=...;Database=...` connection string.
    pub fn from_connection_string(s: &str) -> Result<Self> {
        let mut server = None;
        let mut database = None;

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::InvalidConnectionString(format!("expected key=value, got '{}'", part))
            })?;
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "server" | "data source" | "host" => server = Some(value.to_string()),
                "database" | "initial catalog" | "path" => database = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        let database = database
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::InvalidConnectionString("missing Database".to_string()))?;
        // Without a server name, report the file itself
        let server = server
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| database.display().to_string());

        Ok(Self { server, database })
    }

    /// Target named by a loaded config file.
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_connection_string() {
        let creds = Credentials::from_connection_string(
            "Server=sql-prod-01;Database=/var/lib/wiac/prod.duckdb;User Id=sa;Password=x",
        )
        .unwrap();
        assert_eq!(creds.server, "sql-prod-01");
        assert_eq!(creds.database, PathBuf::from("/var/lib/wiac/prod.duckdb"));
    }

    #[test]
    fn test_parse_aliases_and_whitespace() {
        let creds = Credentials::from_connection_string(
            " data source = reporting ; INITIAL CATALOG = /tmp/r.duckdb ; ",
        )
        .unwrap();
        assert_eq!(creds.server, "reporting");
        assert_eq!(creds.database, PathBuf::from("/tmp/r.duckdb"));
    }

    #[test]
    fn test_server_defaults_to_database() {
        let creds = Credentials::from_connection_string("Database=/tmp/only.duckdb").unwrap();
        assert_eq!(creds.server, "/tmp/only.duckdb");
    }

    #[test]
    fn test_missing_database_rejected() {
        let err = Credentials::from_connection_string("Server=abc").unwrap_err();
        assert!(matches!(err, Error::InvalidConnectionString(_)));

        let err = Credentials::from_connection_string("Server=abc;Database=").unwrap_err();
        assert!(matches!(err, Error::InvalidConnectionString(_)));
    }

    #[test]
    fn test_malformed_pair_rejected() {
        let err = Credentials::from_connection_string("Server=abc;garbage").unwrap_err();
        assert!(matches!(err, Error::InvalidConnectionString(_)));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::with_root("/tmp/test-wiac");
        config.server = "db01".to_string();
        let creds = Credentials::from_config(&config);
        assert_eq!(creds.server, "db01");
        assert_eq!(creds.database, PathBuf::from("/tmp/test-wiac/db/wiac.duckdb"));
    }
}
