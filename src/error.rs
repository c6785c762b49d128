//! Error types for the session pool.
//!
//! Every failure the pool can produce is a [`DbError`] variant. Only
//! [`DbError::Configuration`] is meant to stop a process; everything else is
//! returned to the caller, which decides whether to retry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Startup configuration is unusable (e.g. no "default" section).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unknown section: {section}")]
    UnknownSection { section: String },

    /// The idle set was empty and a new physical connection could not be opened.
    #[error("Provisioning failed for section '{section}': {message}")]
    Provision {
        section: String,
        message: String,
        suggestion: String,
    },

    #[error("Transaction already in progress for session '{session}'")]
    TransactionConflict { session: String },

    #[error("No active transaction for session '{session}'")]
    NoActiveTransaction { session: String },

    #[error("Cannot release connections of session '{session}' while a transaction is active")]
    ReleaseBlocked { session: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A read-only lookup found nothing. Used internally by the routing layer.
    #[error("No {what} for session '{session}'")]
    NotFound { what: String, session: String },

    /// A begin/commit/rollback/ping/close call failed at the provider.
    #[error("Driver error: {message}")]
    Driver { message: String, suggestion: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unknown_section(section: impl Into<String>) -> Self {
        Self::UnknownSection {
            section: section.into(),
        }
    }

    /// Create a provisioning error with a helpful suggestion.
    pub fn provision(
        section: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Provision {
            section: section.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn transaction_conflict(session: impl Into<String>) -> Self {
        Self::TransactionConflict {
            session: session.into(),
        }
    }

    pub fn no_active_transaction(session: impl Into<String>) -> Self {
        Self::NoActiveTransaction {
            session: session.into(),
        }
    }

    pub fn release_blocked(session: impl Into<String>) -> Self {
        Self::ReleaseBlocked {
            session: session.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>, session: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            session: session.into(),
        }
    }

    /// Create a driver error with a helpful suggestion.
    pub fn driver(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Provision { suggestion, .. } => Some(suggestion),
            Self::Driver { suggestion, .. } => Some(suggestion),
            Self::ReleaseBlocked { .. } => {
                Some("Commit or roll back the transaction before releasing connections")
            }
            Self::NoActiveTransaction { .. } => Some("Call begin_transaction first"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// The pool never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provision { .. } | Self::Driver { .. })
    }

    /// Re-tag a driver failure raised while opening a connection for `section`.
    pub(crate) fn into_provision(self, section: &str) -> Self {
        match self {
            Self::Driver {
                message,
                suggestion,
            } => Self::provision(section, message, suggestion),
            Self::Provision { .. } => self,
            other => Self::provision(section, other.to_string(), "Check the section configuration"),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::driver(
                msg.to_string(),
                "Check the section's address, port, credentials and driver",
            ),
            sqlx::Error::Database(db_err) => {
                let message = match db_err.code() {
                    Some(code) => format!("{} (SQLSTATE: {})", db_err.message(), code),
                    None => db_err.message().to_string(),
                };
                DbError::driver(message, "Check the statement and the database state")
            }
            sqlx::Error::PoolTimedOut => DbError::driver(
                "Timed out acquiring the physical connection",
                "The connection may be held by an open transaction",
            ),
            sqlx::Error::PoolClosed => {
                DbError::driver("Connection is closed", "Provision a new connection")
            }
            sqlx::Error::Io(io_err) => DbError::driver(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::driver(
                format!("TLS error: {}", tls_err),
                "Verify the sslmode setting and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::driver(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::driver(
                format!("Unknown database error: {}", err),
                "Check the database server logs",
            ),
        }
    }
}

/// Result type alias for pool operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::provision("slave", "connection refused", "Check the server");
        assert!(err.to_string().contains("slave"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::driver("boom", "Check the server");
        assert_eq!(err.suggestion(), Some("Check the server"));
        assert!(DbError::release_blocked("s1").suggestion().is_some());
        assert!(DbError::unknown_section("x").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::provision("default", "down", "retry").is_retryable());
        assert!(DbError::driver("reset", "retry").is_retryable());
        assert!(!DbError::transaction_conflict("s1").is_retryable());
        assert!(!DbError::configuration("no default").is_retryable());
        assert!(!DbError::invalid_input("blank").is_retryable());
    }

    #[test]
    fn test_into_provision_keeps_driver_message() {
        let err = DbError::driver("auth failed", "Check the password").into_provision("slave");
        match err {
            DbError::Provision {
                section,
                message,
                suggestion,
            } => {
                assert_eq!(section, "slave");
                assert_eq!(message, "auth failed");
                assert_eq!(suggestion, "Check the password");
            }
            other => panic!("expected provision error, got {other:?}"),
        }
    }

    #[test]
    fn test_sqlx_pool_closed_maps_to_driver() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Driver { .. }));
    }
}
