//! In-memory connection provider.
//!
//! Opens no sockets. Used by the `--dry-run` mode of the binary and by tests,
//! which rely on its call counters and failure injection.

use crate::db::provider::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionStats, Section};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct MemoryConnection {
    section: String,
    in_transaction: bool,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryProvider {
    connections: RwLock<HashMap<String, MemoryConnection>>,
    open_delay: Option<Duration>,
    /// Number of upcoming `open` calls that fail.
    failing_opens: AtomicUsize,
    /// Sections whose `open` calls fail until switched off again.
    failing_sections: std::sync::RwLock<HashSet<String>>,
    failing_begins: AtomicBool,
    opens: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `open`, to widen race windows in tests.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make every `open` for `section` fail until switched off again.
    pub fn fail_section(&self, section: &str, fail: bool) {
        let mut failing = match self.failing_sections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if fail {
            failing.insert(section.to_string());
        } else {
            failing.remove(section);
        }
    }

    /// Make every `begin` fail until switched off again.
    pub fn fail_begins(&self, fail: bool) {
        self.failing_begins.store(fail, Ordering::SeqCst);
    }

    /// Successful `open` calls so far.
    pub fn opened(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub async fn in_transaction(&self, alias: &str) -> bool {
        let conns = self.connections.read().await;
        conns.get(alias).is_some_and(|c| c.in_transaction)
    }

    pub async fn is_open(&self, alias: &str) -> bool {
        let conns = self.connections.read().await;
        conns.get(alias).is_some_and(|c| !c.closed)
    }

    /// Section a connection was opened for.
    pub async fn section_of(&self, alias: &str) -> Option<String> {
        let conns = self.connections.read().await;
        conns.get(alias).map(|c| c.section.clone())
    }

    fn take_open_failure(&self, section: &str) -> bool {
        let section_fails = match self.failing_sections.read() {
            Ok(guard) => guard.contains(section),
            Err(poisoned) => poisoned.into_inner().contains(section),
        };
        section_fails
            || self
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    fn unknown_alias(alias: &str) -> DbError {
        DbError::driver(
            format!("No connection registered as '{}'", alias),
            "Provision the connection before using it",
        )
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn open(&self, section: &Section, alias: &str) -> DbResult<()> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_open_failure(&section.name) {
            return Err(DbError::driver(
                format!("Simulated connect failure for '{}'", section.name),
                "Check network connectivity and database server status",
            ));
        }

        let mut conns = self.connections.write().await;
        // a closed alias may be opened again
        if conns.get(alias).is_some_and(|c| !c.closed) {
            return Err(DbError::driver(
                format!("Alias '{}' is already registered", alias),
                "Aliases must be unique",
            ));
        }
        conns.insert(
            alias.to_string(),
            MemoryConnection {
                section: section.name.clone(),
                in_transaction: false,
                closed: false,
            },
        );
        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!(alias = %alias, section = %section.name, "Opened in-memory connection");
        Ok(())
    }

    async fn begin(&self, alias: &str) -> DbResult<()> {
        if self.failing_begins.load(Ordering::SeqCst) {
            return Err(DbError::driver("Simulated begin failure", "Retry the transaction"));
        }
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(alias)
            .ok_or_else(|| Self::unknown_alias(alias))?;
        if conn.in_transaction {
            return Err(DbError::driver(
                format!("Connection '{}' already has an open transaction", alias),
                "Commit or roll back first",
            ));
        }
        conn.in_transaction = true;
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self, alias: &str) -> DbResult<()> {
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(alias)
            .ok_or_else(|| Self::unknown_alias(alias))?;
        if !conn.in_transaction {
            return Err(DbError::driver(
                format!("Connection '{}' has no open transaction", alias),
                "Call begin first",
            ));
        }
        conn.in_transaction = false;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, alias: &str) -> DbResult<()> {
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(alias)
            .ok_or_else(|| Self::unknown_alias(alias))?;
        if !conn.in_transaction {
            return Err(DbError::driver(
                format!("Connection '{}' has no open transaction", alias),
                "Call begin first",
            ));
        }
        conn.in_transaction = false;
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self, alias: &str) -> DbResult<()> {
        let conns = self.connections.read().await;
        match conns.get(alias) {
            Some(conn) if !conn.closed => Ok(()),
            Some(_) => Err(DbError::driver(
                format!("Connection '{}' is closed", alias),
                "Provision a new connection",
            )),
            None => Err(Self::unknown_alias(alias)),
        }
    }

    async fn close(&self, alias: &str) -> DbResult<()> {
        let mut conns = self.connections.write().await;
        let conn = conns
            .get_mut(alias)
            .ok_or_else(|| Self::unknown_alias(alias))?;
        conn.closed = true;
        conn.in_transaction = false;
        Ok(())
    }

    async fn stats(&self, alias: &str) -> DbResult<ConnectionStats> {
        let conns = self.connections.read().await;
        let conn = conns.get(alias).ok_or_else(|| Self::unknown_alias(alias))?;
        Ok(ConnectionStats {
            open_connections: if conn.closed { 0 } else { 1 },
        })
    }
}
