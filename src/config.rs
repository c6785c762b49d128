//! Configuration handling for the session pool.
//!
//! CLI arguments and environment variables select the section file and the
//! logging setup; the section file itself is JSON, one record per section.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectParams, Driver, Section, TlsMode};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Configuration for the session pool binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-session-pool",
    about = "Session-scoped database connection pool - connects every configured section and reports pool state",
    version,
    author
)]
pub struct Config {
    /// JSON file mapping section names to connect parameters.
    /// A "default" section is required.
    #[arg(short = 's', long = "sections", value_name = "PATH", env = "POOL_SECTIONS")]
    pub sections: Option<PathBuf>,

    /// Seconds to wait for a physical connection to become available
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "POOL_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "POOL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "POOL_JSON_LOGS")]
    pub json_logs: bool,

    /// Bootstrap against the in-memory provider instead of real databases
    #[arg(long, env = "POOL_DRY_RUN")]
    pub dry_run: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            sections: None,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            dry_run: false,
        }
    }

    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    /// Read and parse the configured section file.
    pub async fn load_sections(&self) -> DbResult<HashMap<String, Section>> {
        let path = self
            .sections
            .as_deref()
            .ok_or_else(|| DbError::configuration("no section file configured (--sections)"))?;
        load_sections(path).await
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// A JSON number, or a string holding one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(u64),
    Text(String),
}

impl Numeric {
    /// `None` for an empty string.
    fn parse<T: TryFrom<u64>>(&self, section: &str, field: &str) -> DbResult<Option<T>> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) if s.trim().is_empty() => return Ok(None),
            Numeric::Text(s) => s.trim().parse::<u64>().map_err(|_| {
                DbError::configuration(format!(
                    "section '{}': {} must be a number, got '{}'",
                    section, field, s
                ))
            })?,
        };
        T::try_from(value).map(Some).map_err(|_| {
            DbError::configuration(format!(
                "section '{}': {} value {} is out of range",
                section, field, value
            ))
        })
    }
}

/// One section record of the section file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub address: String,
    pub charset: String,
    connection: Option<Numeric>,
    pub db_name: String,
    pub driver: String,
    pub id: String,
    pub loc: String,
    port: Option<Numeric>,
    pub pw: String,
    pub sslmode: String,
}

impl SectionConfig {
    /// Validate the record and turn it into a [`Section`] named `name`.
    pub fn into_section(self, name: &str) -> DbResult<Section> {
        let driver: Driver = self.driver.parse().map_err(|e: DbError| {
            DbError::configuration(format!("section '{}': {}", name, e))
        })?;

        let connection_count = match &self.connection {
            Some(n) => n.parse::<u32>(name, "connection")?.unwrap_or(0),
            None => 0,
        };
        let port = match &self.port {
            Some(n) => n.parse::<u16>(name, "port")?,
            None => None,
        };
        let tls_mode = if self.sslmode.trim().is_empty() {
            None
        } else {
            let mode: TlsMode = self.sslmode.parse().map_err(|e: DbError| {
                DbError::configuration(format!("section '{}': {}", name, e))
            })?;
            Some(mode)
        };

        let params = ConnectParams {
            address: self.address,
            port,
            database: self.db_name,
            username: self.id,
            password: self.pw,
            charset: non_empty(self.charset),
            locale: non_empty(self.loc),
            tls_mode,
        };
        Section::new(name, driver, connection_count, params)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Parse a section file body.
///
/// Does not require a "default" section; the pool checks that when it is
/// constructed.
pub fn parse_sections(json: &str) -> DbResult<HashMap<String, Section>> {
    let raw: HashMap<String, SectionConfig> = serde_json::from_str(json)
        .map_err(|e| DbError::configuration(format!("invalid section file: {}", e)))?;

    raw.into_iter()
        .map(|(name, config)| {
            let section = config.into_section(&name)?;
            Ok((name, section))
        })
        .collect()
}

/// Read and parse a section file from disk.
pub async fn load_sections(path: &Path) -> DbResult<HashMap<String, Section>> {
    let body = tokio::fs::read_to_string(path).await.map_err(|e| {
        DbError::configuration(format!("cannot read section file {}: {}", path.display(), e))
    })?;
    parse_sections(&body)
}
