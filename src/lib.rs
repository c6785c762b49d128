//! Session-scoped database connection pool.
//!
//! Multiplexes physical connections to several database sections (the
//! primary "default" section, read replicas, shards) across many short-lived
//! sessions. Once a session pins the primary or opens a transaction, every
//! later lookup of that session lands on the same connection.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{ConnectionHandle, ConnectionProvider, MemoryProvider, SessionPool, SqlxProvider};
pub use error::{DbError, DbResult};
pub use models::{Section, SessionId};
