//! Runtime configuration.
//!
//! Values come from command-line flags, each of which falls back to an
//! environment variable (see [`crate::cli::Cli`]). This module turns the raw
//! values into the settings the database and server consume.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::Database;

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

/// Where contacts live and how long to wait for a locked database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Resolve the database location. `url` may be a `sqlite://` URL or a
    /// plain filesystem path; `None` selects the per-user default.
    pub fn resolve(url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let database_path = match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => parse_database_url(url)?,
            None => Database::default_path()?,
        };

        Ok(Self {
            database_path,
            busy_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn open(&self) -> Result<Database> {
        Database::open_at(&self.database_path, self.busy_timeout)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        Ok(Self {
            host: host.into(),
            port,
            workers,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Accepts `sqlite:///relative.db`, `sqlite:////abs/path.db`, or a bare path.
fn parse_database_url(url: &str) -> Result<PathBuf> {
    if let Some(rest) = url.strip_prefix("sqlite://") {
        // One slash separates the (empty) host from the path.
        let path = rest.strip_prefix('/').unwrap_or(rest);
        if path.is_empty() {
            return Err(anyhow!("DATABASE_URL has no file path: {}", url));
        }
        return Ok(PathBuf::from(path));
    }

    if let Some((scheme, _)) = url.split_once("://") {
        return Err(anyhow!(
            "Unsupported database scheme '{}': only sqlite is available",
            scheme
        ));
    }

    Ok(PathBuf::from(url))
}
