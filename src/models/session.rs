//! Session identifiers.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::str::FromStr;

/// Caller-supplied key correlating all database work of one logical unit of
/// work (typically one inbound request).
///
/// Construction rejects blank identifiers, so every pool operation can take a
/// `&SessionId` without re-validating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> DbResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DbError::invalid_input("session id cannot be blank"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
