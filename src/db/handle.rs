//! Caller-facing wrapper around a leased connection.

use crate::db::provider::ConnectionProvider;
use crate::error::DbResult;
use crate::models::{Connection, ConnectionId, ConnectionInfo, Driver};
use std::sync::Arc;
use tracing::{info, warn};

/// A connection as handed out by [`SessionPool`](crate::db::SessionPool).
///
/// Cloning the handle does not lease anything; the pool tracks leases by
/// session. The closed flag is advisory and shared with the pool's record.
#[derive(Clone)]
pub struct ConnectionHandle {
    connection: Connection,
    provider: Arc<dyn ConnectionProvider>,
    transactional: bool,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("alias", &self.connection.alias)
            .field("section", &self.connection.section)
            .field("transactional", &self.transactional)
            .field("closed", &self.connection.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(
        connection: Connection,
        provider: Arc<dyn ConnectionProvider>,
        transactional: bool,
    ) -> Self {
        Self {
            connection,
            provider,
            transactional,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    /// Alias the provider registered this connection under.
    pub fn alias(&self) -> &str {
        &self.connection.alias
    }

    pub fn section(&self) -> &str {
        &self.connection.section
    }

    pub fn driver(&self) -> Driver {
        self.connection.driver
    }

    /// Whether this handle was returned as the session's transaction connection.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub fn info(&self) -> ConnectionInfo {
        self.connection.info()
    }

    /// Round-trip to the server; clears the closed flag on success.
    pub async fn ping(&self) -> DbResult<()> {
        match self.provider.ping(&self.connection.alias).await {
            Ok(()) => {
                self.connection.set_closed(false);
                Ok(())
            }
            Err(e) => {
                warn!(alias = %self.connection.alias, error = %e, "Ping failed");
                Err(e)
            }
        }
    }

    /// Close the physical connection.
    ///
    /// The pool keeps its record of the connection; closing only sets the
    /// advisory flag every holder of this connection observes.
    pub async fn close(&self) -> DbResult<()> {
        self.provider.close(&self.connection.alias).await?;
        self.connection.set_closed(true);
        info!(alias = %self.connection.alias, section = %self.connection.section, "Connection closed");
        Ok(())
    }

    pub async fn open_connections(&self) -> DbResult<u32> {
        let stats = self.provider.stats(&self.connection.alias).await?;
        Ok(stats.open_connections)
    }
}
