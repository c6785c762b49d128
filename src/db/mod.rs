//! Connection management.
//!
//! - `provider`: the seam to physical connection I/O
//! - `sqlx_provider` / `memory`: the two provider implementations
//! - `provisioner`: section registry and alias generation
//! - `pool`: idle/leased bookkeeping and lease maps
//! - `session`: the session routing protocol callers use
//! - `handle`: the connection wrapper returned to callers

#[macro_use]
pub mod macros;
pub mod handle;
pub mod memory;
pub mod pool;
pub mod provider;
pub mod provisioner;
pub mod session;
pub mod sqlx_provider;

pub use handle::ConnectionHandle;
pub use memory::MemoryProvider;
pub use pool::ConnectionPool;
pub use provider::ConnectionProvider;
pub use provisioner::{Provisioner, RESERVED_DEFAULT_ALIAS};
pub use session::SessionPool;
pub use sqlx_provider::{DbPool, SqlxProvider};
