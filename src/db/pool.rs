//! Connection pool bookkeeping.
//!
//! [`ConnectionPool`] is the single source of truth for which connections are
//! idle, which are leased to which session, and which leased connection a
//! session uses for primary affinity or an open transaction.
//!
//! # Ownership
//!
//! The pool owns every [`Connection`] record in one arena keyed by
//! [`ConnectionId`]. The idle sets, leased sets and the master/transaction
//! lease maps only hold ids.
//!
//! # Locking
//!
//! All four structures sit behind one `tokio::sync::RwLock`:
//! - lookups (`reuse_conn`, `master_conn`, `transaction_conn`, `snapshot`)
//!   take the read lock;
//! - every mutation takes the write lock;
//! - `pick_one` checks the idle set, provisions when it is empty and moves the
//!   connection into the session's leased set without releasing the write
//!   lock. Pool growth is therefore serialized, including the provider
//!   round trip.
//!
//! # Invariants
//!
//! 1. Every connection id is in exactly one idle set or one leased set.
//! 2. A master lease points into the session's leased set for "default".
//! 3. A transaction lease points into one of the session's leased sets; a
//!    session has at most one.

use crate::db::provisioner::{Provisioner, RESERVED_DEFAULT_ALIAS};
use crate::error::{DbError, DbResult};
use crate::models::{
    Connection, ConnectionId, ConnectionInfo, DEFAULT_SECTION, PoolSnapshot, SessionId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    connections: HashMap<ConnectionId, Connection>,
    /// section -> idle ids
    idle: HashMap<String, HashSet<ConnectionId>>,
    /// session -> section -> leased ids
    leased: HashMap<SessionId, HashMap<String, HashSet<ConnectionId>>>,
    master: HashMap<SessionId, ConnectionId>,
    transactions: HashMap<SessionId, ConnectionId>,
}

impl PoolState {
    fn add_idle(&mut self, conn: Connection) -> ConnectionId {
        let id = conn.id;
        self.idle
            .entry(conn.section.clone())
            .or_default()
            .insert(id);
        self.connections.insert(id, conn);
        id
    }

    /// Remove an arbitrary idle id of `section`.
    fn take_idle(&mut self, section: &str) -> Option<ConnectionId> {
        let idle = self.idle.get_mut(section)?;
        let id = idle.iter().next().copied()?;
        idle.remove(&id);
        Some(id)
    }

    /// Move `id` out of the idle set of `section` into the session's leased set.
    fn relocate(&mut self, section: &str, session: &SessionId, id: ConnectionId) {
        if let Some(idle) = self.idle.get_mut(section) {
            idle.remove(&id);
        }
        self.leased
            .entry(session.clone())
            .or_default()
            .entry(section.to_string())
            .or_default()
            .insert(id);
    }

    fn connection(&self, id: ConnectionId) -> DbResult<Connection> {
        self.connections
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::internal(format!("connection {} missing from arena", id)))
    }

    fn is_leased(&self, session: &SessionId, section: &str, id: ConnectionId) -> bool {
        self.leased
            .get(session)
            .and_then(|sections| sections.get(section))
            .is_some_and(|ids| ids.contains(&id))
    }

    fn is_leased_anywhere(&self, session: &SessionId, id: ConnectionId) -> bool {
        self.leased
            .get(session)
            .is_some_and(|sections| sections.values().any(|ids| ids.contains(&id)))
    }

    fn info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(Connection::info)
    }

    fn infos<'a>(&self, ids: impl IntoIterator<Item = &'a ConnectionId>) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = ids.into_iter().filter_map(|id| self.info(id)).collect();
        infos.sort_by(|a, b| a.alias.cmp(&b.alias));
        infos
    }

    fn alias(&self, id: &ConnectionId) -> String {
        self.connections
            .get(id)
            .map(|c| c.alias.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug)]
pub struct ConnectionPool {
    state: RwLock<PoolState>,
    provisioner: Provisioner,
}

impl ConnectionPool {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            provisioner,
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Open the initial connections of every section.
    ///
    /// The default section is connected first, `max(1, count)` connections,
    /// and its first connection takes the reserved alias. The remaining
    /// sections follow in name order. Every section ends with at least one
    /// idle connection; the first provisioning failure aborts the bootstrap.
    ///
    /// On failure every connection opened so far is closed and forgotten, so
    /// a later bootstrap against the same provider can claim the same aliases.
    pub async fn bootstrap(&self) -> DbResult<()> {
        let mut opened = Vec::new();
        match self.bootstrap_sections(&mut opened).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abandon(&opened).await;
                Err(e)
            }
        }
    }

    async fn bootstrap_sections(&self, opened: &mut Vec<String>) -> DbResult<()> {
        let mut first_default = true;
        for section in self.provisioner.bootstrap_order() {
            for _ in 0..section.initial_count() {
                let conn = self
                    .provisioner
                    .provision(&section.name, first_default)
                    .await?;
                first_default = false;
                opened.push(conn.alias.clone());

                let mut state = self.state.write().await;
                state.add_idle(conn);
            }
            info!(
                section = %section.name,
                connections = section.initial_count(),
                "Section connected"
            );
        }
        Ok(())
    }

    /// Close the connections of a failed bootstrap and clear the pool.
    async fn abandon(&self, aliases: &[String]) {
        for alias in aliases {
            if let Err(e) = self.provisioner.provider().close(alias).await {
                // Best effort close - ignore errors
                warn!(alias = %alias, error = %e, "Failed to close connection of aborted bootstrap");
            }
        }
        if aliases.iter().any(|a| a == RESERVED_DEFAULT_ALIAS) {
            self.provisioner.release_reserved_alias();
        }
        let mut state = self.state.write().await;
        *state = PoolState::default();
        warn!(closed = aliases.len(), "Bootstrap aborted, opened connections closed");
    }

    /// Lease one connection of `section` to `session`, growing the section
    /// by exactly one connection when its idle set is empty.
    ///
    /// There is no upper bound on how far a section may grow.
    pub async fn pick_one(&self, section: &str, session: &SessionId) -> DbResult<Connection> {
        let mut state = self.state.write().await;
        let id = self.pick_locked(&mut state, section, session).await?;
        state.connection(id)
    }

    async fn pick_locked(
        &self,
        state: &mut PoolState,
        section: &str,
        session: &SessionId,
    ) -> DbResult<ConnectionId> {
        if !self.provisioner.contains(section) {
            return Err(DbError::unknown_section(section));
        }

        if let Some(id) = state.take_idle(section) {
            state.relocate(section, session, id);
            debug!(section = %section, session = %session, alias = %state.alias(&id), "Leased idle connection");
            return Ok(id);
        }

        let conn = self.provisioner.provision(section, false).await?;
        let id = state.add_idle(conn);
        state.relocate(section, session, id);

        let total = state
            .connections
            .values()
            .filter(|c| c.section == section)
            .count();
        info!(
            section = %section,
            session = %session,
            alias = %state.alias(&id),
            total = total,
            "Idle set empty, grew section by one connection"
        );
        Ok(id)
    }

    /// Return a connection of `section` the session already holds.
    pub async fn reuse_conn(&self, section: &str, session: &SessionId) -> DbResult<Connection> {
        let state = self.state.read().await;
        let id = state
            .leased
            .get(session)
            .and_then(|sections| sections.get(section))
            .and_then(|ids| ids.iter().next().copied())
            .ok_or_else(|| DbError::not_found(format!("leased '{}' connection", section), session.as_str()))?;
        state.connection(id)
    }

    /// Record `conn` as the session's master-bound connection.
    ///
    /// `conn` must already be leased to the session in the default section.
    pub async fn set_master(&self, session: &SessionId, conn: &Connection) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.is_leased(session, DEFAULT_SECTION, conn.id) {
            return Err(DbError::internal(format!(
                "connection '{}' is not a default-section lease of session '{}'",
                conn.alias, session
            )));
        }
        state.master.insert(session.clone(), conn.id);
        Ok(())
    }

    pub async fn master_conn(&self, session: &SessionId) -> DbResult<Connection> {
        let state = self.state.read().await;
        let id = state
            .master
            .get(session)
            .copied()
            .ok_or_else(|| DbError::not_found("master connection", session.as_str()))?;
        state.connection(id)
    }

    pub async fn delete_master(&self, session: &SessionId) {
        let mut state = self.state.write().await;
        state.master.remove(session);
    }

    /// Record `conn` as the session's transaction-bound connection.
    ///
    /// `conn` must already be leased to the session. Fails with
    /// [`DbError::TransactionConflict`] if the session has one already.
    pub async fn set_transaction(&self, session: &SessionId, conn: &Connection) -> DbResult<()> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(session) {
            return Err(DbError::transaction_conflict(session.as_str()));
        }
        if !state.is_leased_anywhere(session, conn.id) {
            return Err(DbError::internal(format!(
                "connection '{}' is not leased to session '{}'",
                conn.alias, session
            )));
        }
        state.transactions.insert(session.clone(), conn.id);
        Ok(())
    }

    pub async fn transaction_conn(&self, session: &SessionId) -> DbResult<Connection> {
        let state = self.state.read().await;
        let id = state
            .transactions
            .get(session)
            .copied()
            .ok_or_else(|| DbError::not_found("transaction connection", session.as_str()))?;
        state.connection(id)
    }

    pub async fn delete_transaction(&self, session: &SessionId) {
        let mut state = self.state.write().await;
        state.transactions.remove(session);
    }

    /// Reserve a default-section connection as the session's master lease.
    ///
    /// Returns `None` without touching anything when the session already has
    /// a transaction or master lease. Check, pick and lease happen under one
    /// write lock.
    pub async fn acquire_master(&self, session: &SessionId) -> DbResult<Option<Connection>> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(session) || state.master.contains_key(session) {
            return Ok(None);
        }
        let id = self.pick_locked(&mut state, DEFAULT_SECTION, session).await?;
        state.master.insert(session.clone(), id);
        state.connection(id).map(Some)
    }

    /// Reserve the connection a new transaction of `session` will run on.
    ///
    /// Promotes the session's master lease when there is one, otherwise leases
    /// a default-section connection. Check, pick and lease happen under one
    /// write lock.
    pub async fn acquire_transaction(&self, session: &SessionId) -> DbResult<Connection> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(session) {
            return Err(DbError::transaction_conflict(session.as_str()));
        }
        let id = match state.master.get(session).copied() {
            Some(id) => id,
            None => self.pick_locked(&mut state, DEFAULT_SECTION, session).await?,
        };
        state.transactions.insert(session.clone(), id);
        state.connection(id)
    }

    /// Return every connection the session holds to the idle sets.
    ///
    /// Refused with [`DbError::ReleaseBlocked`], changing nothing, while the
    /// session has a transaction lease. Returns how many connections went back.
    pub async fn release(&self, session: &SessionId) -> DbResult<usize> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(session) {
            return Err(DbError::release_blocked(session.as_str()));
        }

        state.master.remove(session);
        let Some(sections) = state.leased.remove(session) else {
            return Ok(0);
        };

        let mut released = 0;
        for (section, ids) in sections {
            released += ids.len();
            state.idle.entry(section).or_default().extend(ids);
        }
        debug!(session = %session, released = released, "Released session connections");
        Ok(released)
    }

    /// Consistent diagnostic copy of the current membership.
    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.read().await;

        let idle = state
            .idle
            .iter()
            .map(|(section, ids)| (section.clone(), state.infos(ids)))
            .collect();

        let leased = state
            .leased
            .iter()
            .map(|(session, sections)| {
                let sections: BTreeMap<String, Vec<ConnectionInfo>> = sections
                    .iter()
                    .map(|(section, ids)| (section.clone(), state.infos(ids)))
                    .collect();
                (session.to_string(), sections)
            })
            .collect();

        let master = state
            .master
            .iter()
            .map(|(session, id)| (session.to_string(), state.alias(id)))
            .collect();

        let transactions = state
            .transactions
            .iter()
            .map(|(session, id)| (session.to_string(), state.alias(id)))
            .collect();

        PoolSnapshot {
            idle,
            leased,
            master,
            transactions,
        }
    }

    /// Number of connections ever provisioned by this pool.
    pub async fn connection_count(&self) -> usize {
        let state = self.state.read().await;
        state.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryProvider;
    use crate::models::{ConnectParams, Driver, Section};
    use std::sync::Arc;

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    async fn pool_with(counts: &[(&str, u32)]) -> (ConnectionPool, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let sections = counts
            .iter()
            .map(|(name, count)| {
                let section =
                    Section::new(*name, Driver::MySql, *count, ConnectParams::default()).unwrap();
                (name.to_string(), section)
            })
            .collect();
        let provisioner = Provisioner::new(sections, provider.clone()).unwrap();
        let pool = ConnectionPool::new(provisioner);
        pool.bootstrap().await.unwrap();
        (pool, provider)
    }

    /// Invariants 1-3 over a snapshot.
    fn assert_invariants(snapshot: &PoolSnapshot) {
        let mut seen = HashSet::new();
        for alias in snapshot.aliases() {
            assert!(seen.insert(alias.clone()), "alias {alias} appears twice");
        }
        for (session, alias) in &snapshot.master {
            let defaults = snapshot
                .leased
                .get(session)
                .and_then(|s| s.get(DEFAULT_SECTION))
                .expect("master lease without default lease");
            assert!(defaults.iter().any(|c| &c.alias == alias));
        }
        for (session, alias) in &snapshot.transactions {
            let held = snapshot.leased.get(session).expect("transaction lease without leases");
            assert!(held.values().flatten().any(|c| &c.alias == alias));
        }
    }

    #[tokio::test]
    async fn test_bootstrap_fills_idle_sets() {
        let (pool, provider) = pool_with(&[("default", 2), ("slave", 3), ("shard", 0)]).await;
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.idle_count("default"), 2);
        assert_eq!(snapshot.idle_count("slave"), 3);
        assert_eq!(snapshot.idle_count("shard"), 1);
        assert!(snapshot.leased.is_empty());
        assert_eq!(provider.opened(), 6);
        assert!(snapshot.idle["default"].iter().any(|c| c.alias == "default"));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_propagates() {
        let provider = Arc::new(MemoryProvider::new());
        let section = Section::new("default", Driver::MySql, 1, ConnectParams::default()).unwrap();
        let sections = HashMap::from([("default".to_string(), section)]);
        let pool = ConnectionPool::new(Provisioner::new(sections, provider.clone()).unwrap());

        provider.fail_next_opens(1);
        let result = pool.bootstrap().await;
        assert!(matches!(result, Err(DbError::Provision { .. })));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_closes_opened_connections() {
        let provider = Arc::new(MemoryProvider::new());
        let sections: HashMap<String, Section> = [("default", 2), ("slave", 1)]
            .into_iter()
            .map(|(name, count)| {
                let section =
                    Section::new(name, Driver::MySql, count, ConnectParams::default()).unwrap();
                (name.to_string(), section)
            })
            .collect();
        let pool = ConnectionPool::new(Provisioner::new(sections, provider.clone()).unwrap());

        provider.fail_section("slave", true);
        let result = pool.bootstrap().await;
        match result {
            Err(DbError::Provision { section, .. }) => assert_eq!(section, "slave"),
            other => panic!("expected a provision error, got {other:?}"),
        }
        assert_eq!(provider.opened(), 2);
        assert!(!provider.is_open("default").await);
        assert!(pool.snapshot().await.aliases().is_empty());

        // the retry claims the reserved alias again
        provider.fail_section("slave", false);
        pool.bootstrap().await.unwrap();
        assert!(provider.is_open("default").await);
        let snapshot = pool.snapshot().await;
        assert!(snapshot.idle["default"].iter().any(|c| c.alias == "default"));
        assert_eq!(snapshot.idle_count("default"), 2);
        assert_eq!(snapshot.idle_count("slave"), 1);
        assert_invariants(&snapshot);
    }

    #[tokio::test]
    async fn test_pick_one_moves_idle_to_leased() {
        let (pool, _) = pool_with(&[("default", 1), ("slave", 3)]).await;
        let s1 = session("s1");

        let conn = pool.pick_one("slave", &s1).await.unwrap();
        assert_eq!(conn.section, "slave");

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.idle_count("slave"), 2);
        assert_eq!(snapshot.leased_count("s1", "slave"), 1);
        assert!(!snapshot.idle["slave"].iter().any(|c| c.alias == conn.alias));
        assert_invariants(&snapshot);
    }

    #[tokio::test]
    async fn test_pick_one_grows_empty_section_by_one() {
        let (pool, provider) = pool_with(&[("default", 1), ("slave", 1)]).await;
        pool.pick_one("slave", &session("a")).await.unwrap();
        let opened = provider.opened();

        let conn = pool.pick_one("slave", &session("b")).await.unwrap();
        assert_eq!(provider.opened(), opened + 1);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.idle_count("slave"), 0);
        assert_eq!(snapshot.leased_count("b", "slave"), 1);
        assert_eq!(snapshot.leased["b"]["slave"][0].alias, conn.alias);
        assert_invariants(&snapshot);
    }

    #[tokio::test]
    async fn test_pick_one_provision_failure_changes_nothing() {
        let (pool, provider) = pool_with(&[("default", 1), ("slave", 1)]).await;
        pool.pick_one("slave", &session("a")).await.unwrap();
        let before = pool.snapshot().await;

        provider.fail_next_opens(1);
        let result = pool.pick_one("slave", &session("b")).await;
        assert!(matches!(result, Err(DbError::Provision { .. })));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(pool.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_pick_one_unknown_section() {
        let (pool, provider) = pool_with(&[("default", 1)]).await;
        let opened = provider.opened();
        let result = pool.pick_one("replica", &session("s1")).await;
        assert!(matches!(result, Err(DbError::UnknownSection { .. })));
        assert_eq!(provider.opened(), opened);
    }

    #[tokio::test]
    async fn test_reuse_conn_is_read_only() {
        let (pool, _) = pool_with(&[("default", 2)]).await;
        let s1 = session("s1");
        assert!(matches!(
            pool.reuse_conn("default", &s1).await,
            Err(DbError::NotFound { .. })
        ));

        let picked = pool.pick_one("default", &s1).await.unwrap();
        let before = pool.snapshot().await;
        let reused = pool.reuse_conn("default", &s1).await.unwrap();
        assert_eq!(picked.id, reused.id);
        assert_eq!(pool.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_set_master_requires_default_lease() {
        let (pool, _) = pool_with(&[("default", 1), ("slave", 1)]).await;
        let s1 = session("s1");
        let slave = pool.pick_one("slave", &s1).await.unwrap();
        assert!(matches!(
            pool.set_master(&s1, &slave).await,
            Err(DbError::Internal { .. })
        ));

        let default = pool.pick_one("default", &s1).await.unwrap();
        pool.set_master(&s1, &default).await.unwrap();
        assert_eq!(pool.master_conn(&s1).await.unwrap().id, default.id);

        pool.delete_master(&s1).await;
        assert!(pool.master_conn(&s1).await.is_err());
        // the connection itself stays leased
        assert_eq!(pool.snapshot().await.leased_count("s1", "default"), 1);
    }

    #[tokio::test]
    async fn test_set_transaction_at_most_one() {
        let (pool, _) = pool_with(&[("default", 2)]).await;
        let s1 = session("s1");
        let a = pool.pick_one("default", &s1).await.unwrap();
        let b = pool.pick_one("default", &s1).await.unwrap();

        pool.set_transaction(&s1, &a).await.unwrap();
        assert!(matches!(
            pool.set_transaction(&s1, &b).await,
            Err(DbError::TransactionConflict { .. })
        ));
        assert_eq!(pool.transaction_conn(&s1).await.unwrap().id, a.id);

        pool.delete_transaction(&s1).await;
        assert!(pool.transaction_conn(&s1).await.is_err());
    }

    #[tokio::test]
    async fn test_set_transaction_rejects_foreign_connection() {
        let (pool, _) = pool_with(&[("default", 2)]).await;
        let theirs = pool.pick_one("default", &session("other")).await.unwrap();
        let result = pool.set_transaction(&session("s1"), &theirs).await;
        assert!(matches!(result, Err(DbError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_acquire_master_is_noop_when_bound() {
        let (pool, _) = pool_with(&[("default", 2)]).await;
        let s1 = session("s1");

        let first = pool.acquire_master(&s1).await.unwrap();
        assert!(first.is_some());
        assert!(pool.acquire_master(&s1).await.unwrap().is_none());
        assert_eq!(pool.snapshot().await.leased_count("s1", "default"), 1);
    }

    #[tokio::test]
    async fn test_acquire_transaction_promotes_master() {
        let (pool, provider) = pool_with(&[("default", 1)]).await;
        let s1 = session("s1");
        let master = pool.acquire_master(&s1).await.unwrap().unwrap();
        let opened = provider.opened();

        let txn = pool.acquire_transaction(&s1).await.unwrap();
        assert_eq!(txn.id, master.id);
        assert_eq!(provider.opened(), opened);
        assert_eq!(pool.snapshot().await.leased_count("s1", "default"), 1);

        assert!(matches!(
            pool.acquire_transaction(&s1).await,
            Err(DbError::TransactionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_acquire_master_provision_failure_records_nothing() {
        let (pool, provider) = pool_with(&[("default", 1)]).await;
        pool.pick_one(DEFAULT_SECTION, &session("a")).await.unwrap();
        let s1 = session("s1");
        let before = pool.snapshot().await;

        provider.fail_next_opens(1);
        let result = pool.acquire_master(&s1).await;
        assert!(matches!(result, Err(DbError::Provision { .. })));
        assert!(matches!(pool.master_conn(&s1).await, Err(DbError::NotFound { .. })));
        assert_eq!(pool.snapshot().await, before);

        // retry succeeds once the provider recovers
        assert!(pool.acquire_master(&s1).await.unwrap().is_some());
        assert_invariants(&pool.snapshot().await);
    }

    #[tokio::test]
    async fn test_acquire_transaction_provision_failure_records_nothing() {
        let (pool, provider) = pool_with(&[("default", 1)]).await;
        pool.pick_one(DEFAULT_SECTION, &session("a")).await.unwrap();
        let s1 = session("s1");
        let before = pool.snapshot().await;

        provider.fail_next_opens(1);
        let result = pool.acquire_transaction(&s1).await;
        assert!(matches!(result, Err(DbError::Provision { .. })));
        assert!(matches!(pool.transaction_conn(&s1).await, Err(DbError::NotFound { .. })));
        assert_eq!(pool.snapshot().await, before);

        let txn = pool.acquire_transaction(&s1).await.unwrap();
        assert_eq!(pool.transaction_conn(&s1).await.unwrap().id, txn.id);
        assert_invariants(&pool.snapshot().await);
    }

    #[tokio::test]
    async fn test_release_blocked_by_transaction() {
        let (pool, _) = pool_with(&[("default", 2), ("slave", 1)]).await;
        let s1 = session("s1");
        pool.pick_one("slave", &s1).await.unwrap();
        pool.acquire_transaction(&s1).await.unwrap();
        let before = pool.snapshot().await;

        assert!(matches!(
            pool.release(&s1).await,
            Err(DbError::ReleaseBlocked { .. })
        ));
        assert_eq!(pool.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_release_returns_everything() {
        let (pool, _) = pool_with(&[("default", 2), ("slave", 3)]).await;
        let s1 = session("s1");
        pool.pick_one("slave", &s1).await.unwrap();
        pool.acquire_master(&s1).await.unwrap();

        assert_eq!(pool.release(&s1).await.unwrap(), 2);
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.idle_count("default"), 2);
        assert_eq!(snapshot.idle_count("slave"), 3);
        assert!(!snapshot.has_session("s1"));
        assert!(snapshot.master.is_empty());
        assert!(pool.master_conn(&s1).await.is_err());

        // releasing again is harmless
        assert_eq!(pool.release(&s1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reports_leases_by_alias() {
        let (pool, _) = pool_with(&[("default", 2)]).await;
        let s1 = session("s1");
        let conn = pool.acquire_transaction(&s1).await.unwrap();

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.transactions.get("s1"), Some(&conn.alias));
        assert_invariants(&snapshot);
        assert_eq!(pool.connection_count().await, 2);
    }
}
