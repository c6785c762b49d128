//! Data models for the session pool.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod section;
pub mod session;

// Re-export commonly used types
pub use connection::{
    Connection, ConnectionId, ConnectionInfo, ConnectionStats, PoolSnapshot,
};
pub use section::{ConnectParams, DEFAULT_SECTION, Driver, MASTER_ALIAS, Section, TlsMode};
pub use session::SessionId;
