//! Session routing.
//!
//! [`SessionPool`] is the public face of the crate. Every call is keyed by a
//! [`SessionId`], and the routing rules keep all work of one session on one
//! physical connection once the session has touched the primary or opened a
//! transaction.
//!
//! # Session states
//!
//! - **Idle**: no master or transaction lease. The session may still hold
//!   connections from earlier lookups.
//! - **MasterBound**: a default-section connection is reserved by
//!   [`SessionPool::begin_master_window`].
//! - **InTransaction**: a connection is reserved and `begin` was issued on it.
//!
//! [`SessionPool::commit`] and [`SessionPool::rollback`] return the session to
//! Idle, but they do **not** give the connection back: it stays leased to the
//! session until [`SessionPool::release_connections`]. A session that never
//! releases keeps its connections forever.

use crate::db::handle::ConnectionHandle;
use crate::db::pool::ConnectionPool;
use crate::db::provider::ConnectionProvider;
use crate::db::provisioner::Provisioner;
use crate::error::{DbError, DbResult};
use crate::models::{Connection, DEFAULT_SECTION, MASTER_ALIAS, PoolSnapshot, Section, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Session-scoped connection pool over a set of sections.
///
/// Construct once with [`SessionPool::connect`] and share it (e.g. in an
/// `Arc`); there is no global instance.
#[derive(Debug)]
pub struct SessionPool {
    pool: ConnectionPool,
}

impl SessionPool {
    /// Validate `sections` and open every section's initial connections.
    ///
    /// A missing "default" section fails with [`DbError::Configuration`]
    /// before the provider is asked for anything.
    pub async fn connect(
        sections: HashMap<String, Section>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> DbResult<Self> {
        let provisioner = Provisioner::new(sections, provider)?;
        let pool = ConnectionPool::new(provisioner);
        pool.bootstrap().await?;
        info!(
            sections = ?pool.provisioner().section_names(),
            connections = pool.connection_count().await,
            "Session pool ready"
        );
        Ok(Self { pool })
    }

    /// Configured section names, default first.
    pub fn sections(&self) -> Vec<&str> {
        self.pool.provisioner().section_names()
    }

    /// Connection `session` should use for work on `section`.
    ///
    /// "master" is accepted as a name for the default section. Resolution
    /// order:
    /// 1. the session's transaction connection, whatever `section` is;
    /// 2. the session's master connection, whatever `section` is;
    /// 3. a connection of `section` the session already holds;
    /// 4. a newly leased connection of `section`.
    pub async fn get_connection(&self, section: &str, session: &SessionId) -> DbResult<ConnectionHandle> {
        let section = normalize_section(section)?;

        if let Some(conn) = found(self.pool.transaction_conn(session).await)? {
            debug!(session = %session, section = %section, alias = %conn.alias, "Routed to transaction connection");
            return Ok(self.handle(conn, true));
        }
        if let Some(conn) = found(self.pool.master_conn(session).await)? {
            debug!(session = %session, section = %section, alias = %conn.alias, "Routed to master connection");
            return Ok(self.handle(conn, false));
        }
        if let Some(conn) = found(self.pool.reuse_conn(section, session).await)? {
            debug!(session = %session, section = %section, alias = %conn.alias, "Reused leased connection");
            return Ok(self.handle(conn, false));
        }

        let conn = self.pool.pick_one(section, session).await?;
        debug!(session = %session, section = %section, alias = %conn.alias, "Leased new connection");
        Ok(self.handle(conn, false))
    }

    /// Pin the session to one default-section connection.
    ///
    /// Does nothing when the session is already master-bound or inside a
    /// transaction.
    pub async fn begin_master_window(&self, session: &SessionId) -> DbResult<()> {
        if let Some(conn) = self.pool.acquire_master(session).await? {
            info!(session = %session, alias = %conn.alias, "Master window opened");
        }
        Ok(())
    }

    /// Drop the master lease. The connection stays leased to the session.
    pub async fn end_master_window(&self, session: &SessionId) -> DbResult<()> {
        self.pool.delete_master(session).await;
        debug!(session = %session, "Master window closed");
        Ok(())
    }

    /// Open a transaction for `session`.
    ///
    /// Runs on the session's master connection when it has one, otherwise on a
    /// newly leased default-section connection. Fails with
    /// [`DbError::TransactionConflict`] if a transaction is already open.
    ///
    /// If the provider's `begin` fails, the error is returned but the
    /// transaction lease stays recorded: the caller must call
    /// [`SessionPool::rollback`] before the session can release or begin again.
    pub async fn begin_transaction(&self, session: &SessionId) -> DbResult<ConnectionHandle> {
        let conn = self.pool.acquire_transaction(session).await?;
        if let Err(e) = self.provider().begin(&conn.alias).await {
            warn!(
                session = %session,
                alias = %conn.alias,
                error = %e,
                "Begin failed, transaction lease kept until rollback"
            );
            return Err(e);
        }
        info!(session = %session, alias = %conn.alias, section = %conn.section, "Transaction started");
        Ok(self.handle(conn, true))
    }

    /// Commit the session's transaction and clear the transaction lease.
    ///
    /// The connection is **not** returned to the idle set; call
    /// [`SessionPool::release_connections`] when the session is done. The
    /// lease is cleared even when the commit itself fails.
    pub async fn commit(&self, session: &SessionId) -> DbResult<()> {
        let conn = self.active_transaction(session).await?;
        let result = self.provider().commit(&conn.alias).await;
        self.pool.delete_transaction(session).await;
        match &result {
            Ok(()) => info!(session = %session, alias = %conn.alias, "Transaction committed"),
            Err(e) => warn!(session = %session, alias = %conn.alias, error = %e, "Commit failed"),
        }
        result
    }

    /// Roll back the session's transaction and clear the transaction lease.
    ///
    /// Like [`SessionPool::commit`], the connection stays leased to the session.
    pub async fn rollback(&self, session: &SessionId) -> DbResult<()> {
        let conn = self.active_transaction(session).await?;
        let result = self.provider().rollback(&conn.alias).await;
        self.pool.delete_transaction(session).await;
        match &result {
            Ok(()) => info!(session = %session, alias = %conn.alias, "Transaction rolled back"),
            Err(e) => warn!(session = %session, alias = %conn.alias, error = %e, "Rollback failed"),
        }
        result
    }

    /// Return everything the session holds to the idle sets.
    ///
    /// Fails with [`DbError::ReleaseBlocked`], changing nothing, while a
    /// transaction is open.
    pub async fn release_connections(&self, session: &SessionId) -> DbResult<()> {
        let released = self.pool.release(session).await?;
        info!(session = %session, released = released, "Session released");
        Ok(())
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot().await
    }

    fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        self.pool.provisioner().provider()
    }

    fn handle(&self, conn: Connection, transactional: bool) -> ConnectionHandle {
        ConnectionHandle::new(conn, Arc::clone(self.provider()), transactional)
    }

    async fn active_transaction(&self, session: &SessionId) -> DbResult<Connection> {
        found(self.pool.transaction_conn(session).await)?
            .ok_or_else(|| DbError::no_active_transaction(session.as_str()))
    }
}

/// Map the "master" alias onto the default section and reject blank names.
fn normalize_section(section: &str) -> DbResult<&str> {
    if section.trim().is_empty() {
        return Err(DbError::invalid_input("section name cannot be blank"));
    }
    if section == MASTER_ALIAS {
        Ok(DEFAULT_SECTION)
    } else {
        Ok(section)
    }
}

/// Turn a lookup miss into `None`, passing every other error through.
fn found(result: DbResult<Connection>) -> DbResult<Option<Connection>> {
    match result {
        Ok(conn) => Ok(Some(conn)),
        Err(DbError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
