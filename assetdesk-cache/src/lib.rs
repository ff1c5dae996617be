//! Assetdesk Cache - Bounded Cache Set
//!
//! Independent key→value stores, each with its own capacity (LRU eviction)
//! and time-to-live. A [`CacheSet`] bundles the instances the access layer
//! needs and is owned by the composition root, never by global state.
//!
//! # Example
//!
//! ```
//! use assetdesk_cache::CacheSet;
//! use assetdesk_core::CacheSetConfig;
//!
//! let caches = CacheSet::new(&CacheSetConfig::default());
//! caches.sites().set("contoso.sharepoint.com:/sites/it".into(), "site-id".into());
//! assert_eq!(
//!     caches.sites().get(&"contoso.sharepoint.com:/sites/it".to_string()),
//!     Some("site-id".to_string())
//! );
//! ```

pub mod bounded;
pub mod set;

pub use bounded::{BoundedCache, CacheStats};
pub use set::{CacheSet, ItemSnapshot, ListKey, TransitionAtKey, TransitionsKey, TransitionsSnapshot};
