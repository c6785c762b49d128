//! Connection provider backed by sqlx.
//!
//! Each physical connection handed to the session pool is a sqlx pool capped
//! at a single connection, registered under the alias the session pool
//! generated. A transaction opened with `begin` holds that one connection
//! until it is committed or rolled back.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use crate::db::provider::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{ConnectionStats, Driver, Section, TlsMode};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    /// Number of physical connections currently open.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.size(),
            Postgres(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    /// Get the driver for this pool.
    pub fn driver(&self) -> Driver {
        match self {
            DbPool::MySql(_) => Driver::MySql,
            DbPool::Postgres(_) => Driver::Postgres,
            DbPool::SQLite(_) => Driver::Sqlite,
        }
    }

    async fn begin(&self) -> DbResult<DbTransaction> {
        Ok(match self {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await?),
            DbPool::Postgres(pool) => DbTransaction::Postgres(pool.begin().await?),
            DbPool::SQLite(pool) => DbTransaction::SQLite(pool.begin().await?),
        })
    }
}

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }

    async fn ping(&mut self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.ping().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.ping().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.ping().await.map_err(DbError::from),
        }
    }
}

struct SqlxConnection {
    pool: DbPool,
    transaction: Option<DbTransaction>,
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxConnection")
            .field("pool", &self.pool)
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct SqlxProvider {
    connections: RwLock<HashMap<String, Arc<Mutex<SqlxConnection>>>>,
    acquire_timeout: Duration,
}

impl SqlxProvider {
    pub fn new() -> Self {
        Self::with_acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
    }

    pub fn with_acquire_timeout(acquire_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            acquire_timeout,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Get the underlying sqlx pool for `alias`.
    ///
    /// While a transaction is open the single connection is held by it;
    /// use [`SqlxProvider::execute`] to run statements inside it.
    pub async fn pool(&self, alias: &str) -> DbResult<DbPool> {
        let entry = self.entry(alias).await?;
        let conn = entry.lock().await;
        Ok(conn.pool.clone())
    }

    /// Run a statement on `alias`, inside its open transaction if there is one.
    pub async fn execute(&self, alias: &str, sql: &str) -> DbResult<u64> {
        let entry = self.entry(alias).await?;
        let mut conn = entry.lock().await;
        let SqlxConnection { pool, transaction } = &mut *conn;

        let rows_affected = match transaction.as_mut() {
            Some(DbTransaction::MySql(tx)) => {
                sqlx::query(sql).execute(&mut **tx).await?.rows_affected()
            }
            Some(DbTransaction::Postgres(tx)) => {
                sqlx::query(sql).execute(&mut **tx).await?.rows_affected()
            }
            Some(DbTransaction::SQLite(tx)) => {
                sqlx::query(sql).execute(&mut **tx).await?.rows_affected()
            }
            None => impl_db_dispatch!(pool, {
                MySql(p) => sqlx::query(sql).execute(&*p).await?.rows_affected(),
                Postgres(p) => sqlx::query(sql).execute(&*p).await?.rows_affected(),
                SQLite(p) => sqlx::query(sql).execute(&*p).await?.rows_affected(),
            }),
        };

        debug!(alias = %alias, rows_affected = rows_affected, "Executed statement");
        Ok(rows_affected)
    }

    async fn entry(&self, alias: &str) -> DbResult<Arc<Mutex<SqlxConnection>>> {
        let conns = self.connections.read().await;
        conns.get(alias).cloned().ok_or_else(|| {
            DbError::driver(
                format!("No connection registered as '{}'", alias),
                "Provision the connection before using it",
            )
        })
    }

    async fn connect(&self, section: &Section) -> DbResult<DbPool> {
        let p = &section.params;
        match section.driver {
            Driver::MySql => {
                let options = mysql_options(section);
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(self.acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(section, e))?;
                Ok(DbPool::MySql(pool))
            }
            Driver::Postgres => {
                let options = pg_options(section);
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(self.acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(section, e))?;
                Ok(DbPool::Postgres(pool))
            }
            Driver::Sqlite => {
                let options = SqliteConnectOptions::new()
                    .filename(&p.database)
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(self.acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(section, e))?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }
}

impl Default for SqlxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionProvider for SqlxProvider {
    async fn open(&self, section: &Section, alias: &str) -> DbResult<()> {
        // Early check for an existing alias
        {
            let conns = self.connections.read().await;
            if conns.contains_key(alias) {
                return Err(DbError::driver(
                    format!("Alias '{}' is already registered", alias),
                    "Aliases must be unique",
                ));
            }
        }

        info!(
            section = %section.name,
            alias = %alias,
            dsn = %section.masked_dsn(),
            "Opening physical connection"
        );
        let pool = self.connect(section).await?;

        // Re-check after async work to prevent TOCTOU race
        let duplicate = {
            let mut conns = self.connections.write().await;
            if conns.contains_key(alias) {
                Some(pool)
            } else {
                conns.insert(
                    alias.to_string(),
                    Arc::new(Mutex::new(SqlxConnection {
                        pool,
                        transaction: None,
                    })),
                );
                None
            }
        };

        if let Some(pool) = duplicate {
            pool.close().await;
            return Err(DbError::driver(
                format!("Alias '{}' is already registered", alias),
                "Concurrent open with the same alias detected",
            ));
        }
        Ok(())
    }

    async fn begin(&self, alias: &str) -> DbResult<()> {
        let entry = self.entry(alias).await?;
        let mut conn = entry.lock().await;
        if conn.transaction.is_some() {
            return Err(DbError::driver(
                format!("Connection '{}' already has an open transaction", alias),
                "Commit or roll back first",
            ));
        }
        let tx = conn.pool.begin().await?;
        conn.transaction = Some(tx);
        debug!(alias = %alias, "Transaction started");
        Ok(())
    }

    async fn commit(&self, alias: &str) -> DbResult<()> {
        let entry = self.entry(alias).await?;
        let mut conn = entry.lock().await;
        let tx = conn.transaction.take().ok_or_else(|| {
            DbError::driver(
                format!("Connection '{}' has no open transaction", alias),
                "Call begin first",
            )
        })?;
        tx.commit().await
    }

    async fn rollback(&self, alias: &str) -> DbResult<()> {
        let entry = self.entry(alias).await?;
        let mut conn = entry.lock().await;
        let tx = conn.transaction.take().ok_or_else(|| {
            DbError::driver(
                format!("Connection '{}' has no open transaction", alias),
                "Call begin first",
            )
        })?;
        tx.rollback().await
    }

    async fn ping(&self, alias: &str) -> DbResult<()> {
        let entry = self.entry(alias).await?;
        let mut conn = entry.lock().await;
        if let Some(tx) = conn.transaction.as_mut() {
            return tx.ping().await;
        }
        match &conn.pool {
            DbPool::MySql(pool) => pool.acquire().await?.ping().await?,
            DbPool::Postgres(pool) => pool.acquire().await?.ping().await?,
            DbPool::SQLite(pool) => pool.acquire().await?.ping().await?,
        }
        Ok(())
    }

    async fn close(&self, alias: &str) -> DbResult<()> {
        let entry = {
            let mut conns = self.connections.write().await;
            conns.remove(alias)
        };
        let Some(entry) = entry else {
            return Err(DbError::driver(
                format!("No connection registered as '{}'", alias),
                "The connection may already be closed",
            ));
        };

        let mut conn = entry.lock().await;
        if let Some(tx) = conn.transaction.take() {
            warn!(alias = %alias, "Closing connection with an open transaction, rolling back");
            // Best effort rollback - the connection is going away regardless
            let _ = tx.rollback().await;
        }
        conn.pool.close().await;
        info!(alias = %alias, "Physical connection closed");
        Ok(())
    }

    async fn stats(&self, alias: &str) -> DbResult<ConnectionStats> {
        let entry = self.entry(alias).await?;
        let conn = entry.lock().await;
        Ok(ConnectionStats {
            open_connections: conn.pool.size(),
        })
    }
}

fn mysql_options(section: &Section) -> MySqlConnectOptions {
    let p = &section.params;
    let mut options = MySqlConnectOptions::new()
        .host(&p.address)
        .username(&p.username)
        .password(&p.password)
        .database(&p.database);
    if let Some(port) = section.port() {
        options = options.port(port);
    }
    if let Some(charset) = &p.charset {
        options = options.charset(charset);
    }
    if let Some(loc) = &p.locale {
        options = options.timezone(Some(decode_locale(loc)));
    }
    if let Some(mode) = p.tls_mode {
        options = options.ssl_mode(mysql_ssl_mode(mode));
    }
    options
}

fn pg_options(section: &Section) -> PgConnectOptions {
    let p = &section.params;
    let mut options = PgConnectOptions::new()
        .host(&p.address)
        .username(&p.username)
        .password(&p.password)
        .database(&p.database);
    if let Some(port) = section.port() {
        options = options.port(port);
    }
    if let Some(loc) = &p.locale {
        let tz = decode_locale(loc);
        options = options.options([("TimeZone", tz.as_str())]);
    }
    if let Some(mode) = p.tls_mode {
        options = options.ssl_mode(pg_ssl_mode(mode));
    }
    options
}

/// Percent-decode a section locale, so `Asia%2FSeoul` becomes `Asia/Seoul`.
///
/// `+` is kept as is; malformed escapes pass through unchanged.
fn decode_locale(loc: &str) -> String {
    let bytes = loc.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn mysql_ssl_mode(mode: TlsMode) -> MySqlSslMode {
    match mode {
        TlsMode::Disable => MySqlSslMode::Disabled,
        TlsMode::Prefer => MySqlSslMode::Preferred,
        TlsMode::Require => MySqlSslMode::Required,
        TlsMode::VerifyCa => MySqlSslMode::VerifyCa,
        TlsMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

fn pg_ssl_mode(mode: TlsMode) -> PgSslMode {
    match mode {
        TlsMode::Disable => PgSslMode::Disable,
        TlsMode::Prefer => PgSslMode::Prefer,
        TlsMode::Require => PgSslMode::Require,
        TlsMode::VerifyCa => PgSslMode::VerifyCa,
        TlsMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Wrap a connect failure with a suggestion for the section's driver.
fn connect_error(section: &Section, error: sqlx::Error) -> DbError {
    let error_str = error.to_string().to_lowercase();

    let suggestion = if error_str.contains("connection refused") {
        format!(
            "Check that the {} server for section '{}' is running and accessible",
            section.driver, section.name
        )
    } else if error_str.contains("authentication") || error_str.contains("password") {
        "Verify the id and pw of the section".to_string()
    } else if error_str.contains("does not exist") || error_str.contains("unknown database") {
        "Check that db_name exists".to_string()
    } else if error_str.contains("tls") || error_str.contains("ssl") {
        "Check the sslmode setting or try disabling it".to_string()
    } else {
        format!("Verify the connection settings: {}", section.masked_dsn())
    };

    DbError::provision(&section.name, format!("Failed to connect: {}", error), suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_alias() {
        let provider = SqlxProvider::new();
        let result = provider.begin("missing").await;
        assert!(matches!(result, Err(DbError::Driver { .. })));
        assert!(provider.close("missing").await.is_err());
    }

    fn section_with_locale(driver: Driver, locale: &str) -> Section {
        let params = crate::models::ConnectParams {
            address: "127.0.0.1".to_string(),
            database: "my_db".to_string(),
            locale: Some(locale.to_string()),
            ..Default::default()
        };
        Section::new("default", driver, 1, params).unwrap()
    }

    #[test]
    fn test_default_timeout_matches_config() {
        let config = crate::config::Config::default_config();
        assert_eq!(
            SqlxProvider::new().acquire_timeout(),
            config.acquire_timeout_duration()
        );
    }

    #[test]
    fn test_decode_locale() {
        assert_eq!(decode_locale("Asia%2FSeoul"), "Asia/Seoul");
        assert_eq!(decode_locale("Asia%2fSeoul"), "Asia/Seoul");
        assert_eq!(decode_locale("UTC"), "UTC");
        assert_eq!(decode_locale("+09:00"), "+09:00");
        assert_eq!(decode_locale("bad%zzescape%2"), "bad%zzescape%2");
    }

    #[test]
    fn test_locale_becomes_postgres_timezone() {
        let options = pg_options(&section_with_locale(Driver::Postgres, "Asia%2FSeoul"));
        let startup = options.get_options().unwrap_or_default();
        assert!(startup.contains("TimeZone=Asia/Seoul"), "got {startup:?}");
    }

    #[test]
    fn test_locale_mysql_options_build() {
        // the timezone has no getter; the remaining options must survive it
        let options = mysql_options(&section_with_locale(Driver::MySql, "Asia%2FSeoul"));
        assert_eq!(options.get_host(), "127.0.0.1");
        assert_eq!(options.get_database(), Some("my_db"));
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(mysql_ssl_mode(TlsMode::VerifyFull), MySqlSslMode::VerifyIdentity));
        assert!(matches!(pg_ssl_mode(TlsMode::Disable), PgSslMode::Disable));
    }
}
