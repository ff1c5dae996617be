//! The cache set owned by the composition root.

use std::sync::Arc;

use assetdesk_core::{CacheSetConfig, ListItemRecord, Timestamp, TransitionedItem};

use crate::bounded::{BoundedCache, CacheStats};

/// Key for a resolved list identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub site_id: String,
    pub list: String,
}

/// Key for a derived "transitioned since" result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionsKey {
    pub list_id: String,
    pub state_field: String,
    pub state: String,
    pub cutoff: Timestamp,
}

/// Key for one item's resolved transition instant.
///
/// Includes the item's last-modified timestamp: a new revision can only
/// move the transition instant forward, so an entry for an older version
/// is never consulted again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionAtKey {
    pub list_id: String,
    pub item_id: String,
    pub state_field: String,
    pub state: String,
    pub version: Option<Timestamp>,
}

/// Shared item snapshot.
pub type ItemSnapshot = Arc<Vec<ListItemRecord>>;

/// Shared derived result set.
pub type TransitionsSnapshot = Arc<Vec<TransitionedItem>>;

/// Every cache instance the access layer uses, each independently sized.
///
/// Built once at startup and shared as `Arc<CacheSet>`; tests build a fresh
/// set per case.
#[derive(Debug)]
pub struct CacheSet {
    sites: BoundedCache<String, String>,
    lists: BoundedCache<ListKey, String>,
    items: BoundedCache<String, ItemSnapshot>,
    transitions: BoundedCache<TransitionsKey, TransitionsSnapshot>,
    transition_at: BoundedCache<TransitionAtKey, Option<Timestamp>>,
}

impl CacheSet {
    pub fn new(config: &CacheSetConfig) -> Self {
        Self {
            sites: BoundedCache::new("sites", config.site),
            lists: BoundedCache::new("lists", config.list),
            items: BoundedCache::new("items", config.items),
            transitions: BoundedCache::new("transitions", config.transitions),
            transition_at: BoundedCache::new("transition_at", config.transition_at),
        }
    }

    /// hostname+path → site id.
    pub fn sites(&self) -> &BoundedCache<String, String> {
        &self.sites
    }

    /// (site id, list name) → list id.
    pub fn lists(&self) -> &BoundedCache<ListKey, String> {
        &self.lists
    }

    /// list id → full item collection.
    pub fn items(&self) -> &BoundedCache<String, ItemSnapshot> {
        &self.items
    }

    /// Derived "transitioned since" results.
    pub fn transitions(&self) -> &BoundedCache<TransitionsKey, TransitionsSnapshot> {
        &self.transitions
    }

    /// Per-item transition instants; `None` records "never in that state".
    pub fn transition_at(&self) -> &BoundedCache<TransitionAtKey, Option<Timestamp>> {
        &self.transition_at
    }

    /// Drop the caches a write can stale: item snapshots (and the facet
    /// values derived from them) and derived result sets.
    pub fn invalidate_after_write(&self) {
        self.items.clear();
        self.transitions.clear();
    }

    pub fn clear_all(&self) {
        self.sites.clear();
        self.lists.clear();
        self.items.clear();
        self.transitions.clear();
        self.transition_at.clear();
    }

    /// Stats for every instance, labelled by instance name.
    pub fn stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            (self.sites.name(), self.sites.stats()),
            (self.lists.name(), self.lists.stats()),
            (self.items.name(), self.items.stats()),
            (self.transitions.name(), self.transitions.stats()),
            (self.transition_at.name(), self.transition_at.stats()),
        ]
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new(&CacheSetConfig::default())
    }
}
