//! Section descriptors.
//!
//! A section is one logical database target (the primary, a read replica,
//! a shard) with its own connect parameters and initial pool size.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Name of the mandatory primary section.
pub const DEFAULT_SECTION: &str = "default";

/// Caller-facing alias for the primary section.
pub const MASTER_ALIAS: &str = "master";

/// Supported driver kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    MySql,
    Postgres,
    /// `db_name` holds the database file path.
    Sqlite,
}

impl Driver {
    /// Get the display name for this driver.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }
}

impl FromStr for Driver {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DbError::configuration(format!(
                "unsupported driver: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// TLS mode, passed through to the driver's `sslmode` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for TlsMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "disable" | "disabled" => Ok(Self::Disable),
            "prefer" | "preferred" => Ok(Self::Prefer),
            "require" | "required" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify-identity" => Ok(Self::VerifyFull),
            other => Err(DbError::configuration(format!("unsupported sslmode: {other}"))),
        }
    }
}

/// Connect parameters for one section. Opaque to the pool; only the provider reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectParams {
    pub address: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub charset: Option<String>,
    /// Session time zone / locale, e.g. `Asia%2FSeoul`.
    pub locale: Option<String>,
    pub tls_mode: Option<TlsMode>,
}

/// Immutable descriptor of one logical database target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    pub driver: Driver,
    /// Desired initial connection count as configured (0 means "use 1").
    pub connection_count: u32,
    pub params: ConnectParams,
}

impl Section {
    /// Create a new section descriptor.
    pub fn new(
        name: impl Into<String>,
        driver: Driver,
        connection_count: u32,
        params: ConnectParams,
    ) -> DbResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DbError::invalid_input("section name cannot be blank"));
        }
        Ok(Self {
            name,
            driver,
            connection_count,
            params,
        })
    }

    /// Number of connections to open at bootstrap: never less than one.
    pub fn initial_count(&self) -> usize {
        self.connection_count.max(1) as usize
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_SECTION
    }

    /// Port to connect to, falling back to the driver default.
    pub fn port(&self) -> Option<u16> {
        self.params.port.or_else(|| self.driver.default_port())
    }

    /// Render the connection string in the driver's native DSN form.
    pub fn dsn(&self) -> String {
        self.render_dsn(&self.params.password)
    }

    /// Same as [`Section::dsn`] with the password masked, safe for logs.
    pub fn masked_dsn(&self) -> String {
        if self.params.password.is_empty() {
            self.render_dsn("")
        } else {
            self.render_dsn("****")
        }
    }

    fn render_dsn(&self, password: &str) -> String {
        let p = &self.params;
        let port = self.port().map(|p| p.to_string()).unwrap_or_default();
        let charset = p.charset.as_deref().unwrap_or_default();
        let locale = p.locale.as_deref().unwrap_or_default();
        match self.driver {
            Driver::MySql => format!(
                "{}:{}@tcp({}:{})/{}?charset={}&loc={}",
                p.username, password, p.address, port, p.database, charset, locale
            ),
            Driver::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}?charset={}&loc={}&sslmode={}",
                p.username,
                password,
                p.address,
                port,
                p.database,
                charset,
                locale,
                p.tls_mode.unwrap_or_default().as_str()
            ),
            Driver::Sqlite => format!("sqlite:{}", p.database),
        }
    }
}
