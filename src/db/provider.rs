//! The connection provider seam.
//!
//! The pool never touches a socket. It asks a [`ConnectionProvider`] to open a
//! physical connection under a given alias and later addresses that
//! connection by alias only, the same way a driver-level registry of named
//! databases works.

use crate::error::DbResult;
use crate::models::{ConnectionStats, Section};
use async_trait::async_trait;

/// Performs the physical I/O for connections owned by the pool.
///
/// Implementations keep their own alias-keyed registry. Aliases handed to
/// [`ConnectionProvider::open`] are unique for the lifetime of the pool that
/// generated them.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open a physical connection for `section` and register it as `alias`.
    async fn open(&self, section: &Section, alias: &str) -> DbResult<()>;

    /// Start a transaction on the connection registered as `alias`.
    async fn begin(&self, alias: &str) -> DbResult<()>;

    async fn commit(&self, alias: &str) -> DbResult<()>;

    async fn rollback(&self, alias: &str) -> DbResult<()>;

    /// Round-trip to the server.
    async fn ping(&self, alias: &str) -> DbResult<()>;

    /// Close the physical connection; `ping` fails afterwards.
    async fn close(&self, alias: &str) -> DbResult<()>;

    async fn stats(&self, alias: &str) -> DbResult<ConnectionStats>;
}
