//! Connection records and diagnostic views.
//!
//! The pool owns one [`Connection`] record per provisioned physical
//! connection and refers to it everywhere else by [`ConnectionId`].

use crate::models::section::Driver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pool-scoped identifier of a provisioned connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One physical connection as tracked by the pool.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    /// Owning section name.
    pub section: String,
    /// Process-unique name the provider registered the connection under.
    pub alias: String,
    pub driver: Driver,
    pub created_at: DateTime<Utc>,
    /// Advisory only; shared with every handle to this connection.
    closed: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        section: impl Into<String>,
        alias: impl Into<String>,
        driver: Driver,
    ) -> Self {
        Self {
            id,
            section: section.into(),
            alias: alias.into(),
            driver,
            created_at: Utc::now(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::Release);
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            alias: self.alias.clone(),
            section: self.section.clone(),
            driver: self.driver,
            closed: self.is_closed(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub alias: String,
    pub section: String,
    pub driver: Driver,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
}

/// Live connection statistics reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub open_connections: u32,
}

/// Consistent copy of pool membership taken under the pool lock.
///
/// Every list is sorted by alias so two snapshots of the same state compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// section -> idle connections
    pub idle: BTreeMap<String, Vec<ConnectionInfo>>,
    /// session -> section -> leased connections
    pub leased: BTreeMap<String, BTreeMap<String, Vec<ConnectionInfo>>>,
    /// session -> alias of the master-bound connection
    pub master: BTreeMap<String, String>,
    /// session -> alias of the transaction-bound connection
    pub transactions: BTreeMap<String, String>,
}

impl PoolSnapshot {
    pub fn idle_count(&self, section: &str) -> usize {
        self.idle.get(section).map_or(0, Vec::len)
    }

    pub fn leased_count(&self, session: &str, section: &str) -> usize {
        self.leased
            .get(session)
            .and_then(|sections| sections.get(section))
            .map_or(0, Vec::len)
    }

    /// Connections of `section` leased across all sessions.
    pub fn total_leased(&self, section: &str) -> usize {
        self.leased
            .values()
            .filter_map(|sections| sections.get(section))
            .map(Vec::len)
            .sum()
    }

    pub fn has_session(&self, session: &str) -> bool {
        self.leased.contains_key(session)
    }

    /// Every alias known to the pool, idle or leased.
    pub fn aliases(&self) -> Vec<String> {
        let idle = self.idle.values().flatten();
        let leased = self.leased.values().flat_map(|s| s.values()).flatten();
        idle.chain(leased).map(|c| c.alias.clone()).collect()
    }
}
