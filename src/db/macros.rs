//! Driver dispatch macro.
//!
//! Generates the `match` over [`DbPool`](crate::db::sqlx_provider::DbPool)
//! variants for operations whose body is identical for every driver.

/// Macro for generating driver dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::sqlx_provider::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
