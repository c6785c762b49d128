//! Section registry and connection provisioning.
//!
//! The provisioner owns the configured sections, hands out aliases and asks
//! the provider to open physical connections. It never touches pool
//! membership; the pool inserts what it returns.

use crate::db::provider::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::models::{Connection, ConnectionId, DEFAULT_SECTION, Section};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Alias reserved for the very first connection of the default section.
pub const RESERVED_DEFAULT_ALIAS: &str = DEFAULT_SECTION;

pub struct Provisioner {
    sections: HashMap<String, Section>,
    provider: Arc<dyn ConnectionProvider>,
    /// Random per-instance tag so two pools sharing one provider never collide.
    pool_tag: String,
    next_alias: AtomicU64,
    next_id: AtomicU64,
    reserved_alias_claimed: AtomicBool,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("sections", &self.sections.keys().collect::<Vec<_>>())
            .field("pool_tag", &self.pool_tag)
            .field("next_alias", &self.next_alias.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Validate the section map and build a provisioner.
    ///
    /// Fails with [`DbError::Configuration`] when there is no "default"
    /// section. No connection is attempted here.
    pub fn new(
        sections: HashMap<String, Section>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> DbResult<Self> {
        if !sections.contains_key(DEFAULT_SECTION) {
            return Err(DbError::configuration(format!(
                "a '{}' section is required",
                DEFAULT_SECTION
            )));
        }
        if let Some((key, section)) = sections.iter().find(|(key, s)| **key != s.name) {
            return Err(DbError::configuration(format!(
                "section registered as '{}' is named '{}'",
                key, section.name
            )));
        }

        let pool_tag = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Ok(Self {
            sections,
            provider,
            pool_tag,
            next_alias: AtomicU64::new(1),
            next_id: AtomicU64::new(1),
            reserved_alias_claimed: AtomicBool::new(false),
        })
    }

    pub fn section(&self, name: &str) -> DbResult<&Section> {
        self.sections
            .get(name)
            .ok_or_else(|| DbError::unknown_section(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Section names, default first and the rest sorted.
    pub fn section_names(&self) -> Vec<&str> {
        self.bootstrap_order()
            .into_iter()
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Order in which sections are connected at startup.
    ///
    /// The default section must come first: the first registered connection
    /// establishes the provider's process-wide default.
    pub fn bootstrap_order(&self) -> Vec<&Section> {
        let mut rest: Vec<&Section> = self.sections.values().filter(|s| !s.is_default()).collect();
        rest.sort_by(|a, b| a.name.cmp(&b.name));

        let mut order = Vec::with_capacity(self.sections.len());
        order.extend(self.sections.get(DEFAULT_SECTION));
        order.extend(rest);
        order
    }

    /// Make the reserved alias claimable again after its connection closed.
    pub fn release_reserved_alias(&self) {
        self.reserved_alias_claimed.store(false, Ordering::Release);
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Open one new physical connection for `section_name`.
    ///
    /// With `is_first_default` set on the default section, the connection is
    /// registered under the reserved alias, which can be claimed once per pool.
    pub async fn provision(&self, section_name: &str, is_first_default: bool) -> DbResult<Connection> {
        let section = self.section(section_name)?;

        let reserved = is_first_default
            && section.is_default()
            && self
                .reserved_alias_claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
        let alias = if reserved {
            RESERVED_DEFAULT_ALIAS.to_string()
        } else {
            self.generate_alias(section_name)
        };

        if let Err(e) = self.provider.open(section, &alias).await {
            if reserved {
                self.reserved_alias_claimed.store(false, Ordering::Release);
            }
            warn!(section = %section_name, alias = %alias, error = %e, "Provisioning failed");
            return Err(e.into_provision(section_name));
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            section = %section_name,
            alias = %alias,
            driver = %section.driver,
            "Provisioned connection"
        );
        Ok(Connection::new(id, section_name, alias, section.driver))
    }

    fn generate_alias(&self, section_name: &str) -> String {
        let n = self.next_alias.fetch_add(1, Ordering::Relaxed);
        format!("{}::{}-{:04}", section_name, self.pool_tag, n)
    }
}
