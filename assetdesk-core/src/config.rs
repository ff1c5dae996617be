//! Access-layer configuration.
//!
//! One [`AccessConfig`] is built at startup (usually with
//! [`AccessConfig::from_env`]) and threaded through constructors. Every
//! field is optional in the environment and falls back to the defaults
//! documented on [`AccessConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use crate::error::{AssetdeskError, AssetdeskResult, ConfigError};

/// Capacity and TTL for one cache instance. A zero TTL disables the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: usize,
}

impl CacheSettings {
    pub const fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }
}

/// Settings for every cache instance the access layer owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSetConfig {
    /// hostname+path → site id
    pub site: CacheSettings,
    /// (site id, list name) → list id
    pub list: CacheSettings,
    /// list id → full item snapshot
    pub items: CacheSettings,
    /// (list, state, cutoff) → derived result set
    pub transitions: CacheSettings,
    /// (item, state, version) → transition instant
    pub transition_at: CacheSettings,
}

impl Default for CacheSetConfig {
    fn default() -> Self {
        Self {
            site: CacheSettings::new(Duration::from_secs(600), 32),
            list: CacheSettings::new(Duration::from_secs(600), 128),
            items: CacheSettings::new(Duration::ZERO, 16),
            transitions: CacheSettings::new(Duration::from_secs(60), 64),
            transition_at: CacheSettings::new(Duration::from_secs(300), 5_000),
        }
    }
}

/// Configuration for the upstream access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessConfig {
    /// Base URL of the REST gateway, without trailing slash.
    pub graph_base_url: String,
    /// Retries after the first attempt for throttled calls.
    pub max_retries: u32,
    /// `$top` for bulk reads.
    pub bulk_page_size: u32,
    /// `$top` for the candidate phase of point-in-time queries.
    pub transitions_page_size: u32,
    /// `$top` for revision-history reads.
    pub versions_page_size: u32,
    /// Width of each confirmation batch (max outstanding history reads).
    pub deployed_concurrency: usize,
    /// Overall cap on point-in-time results.
    pub transitions_max_results: usize,
    pub caches: CacheSetConfig,
    /// Budget for the external credential exchange.
    pub credential_timeout: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            max_retries: 3,
            bulk_page_size: 100,
            transitions_page_size: 50,
            versions_page_size: 50,
            deployed_concurrency: 10,
            transitions_max_results: 200,
            caches: CacheSetConfig::default(),
            credential_timeout: Duration::from_millis(10_000),
        }
    }
}

impl AccessConfig {
    /// Create AccessConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ASSETDESK_GRAPH_BASE_URL` (default: `https://graph.microsoft.com/v1.0`)
    /// - `ASSETDESK_MAX_RETRIES` (default: 3)
    /// - `ASSETDESK_BULK_PAGE_SIZE` (default: 100)
    /// - `ASSETDESK_TRANSITIONS_PAGE_SIZE` (default: 50)
    /// - `ASSETDESK_VERSIONS_PAGE_SIZE` (default: 50)
    /// - `ASSETDESK_DEPLOYED_CONCURRENCY` (default: 10)
    /// - `ASSETDESK_TRANSITIONS_MAX_RESULTS` (default: 200)
    /// - `ASSETDESK_{SITE,LIST,ITEMS,TRANSITIONS,TRANSITION_AT}_CACHE_TTL_SECS`
    ///   (defaults: 600, 600, 0, 60, 300)
    /// - `ASSETDESK_{SITE,LIST,ITEMS,TRANSITIONS,TRANSITION_AT}_CACHE_CAPACITY`
    ///   (defaults: 32, 128, 16, 64, 5000)
    /// - `ASSETDESK_CREDENTIAL_TIMEOUT_MS` (default: 10000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AccessConfig::from_env`] but reading from an arbitrary
    /// key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cache = |prefix: &str, fallback: CacheSettings| CacheSettings {
            ttl: Duration::from_secs(parse_or(
                &lookup,
                &format!("ASSETDESK_{prefix}_CACHE_TTL_SECS"),
                fallback.ttl.as_secs(),
            )),
            capacity: parse_or(
                &lookup,
                &format!("ASSETDESK_{prefix}_CACHE_CAPACITY"),
                fallback.capacity,
            ),
        };

        Self {
            graph_base_url: lookup("ASSETDESK_GRAPH_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.graph_base_url),
            max_retries: parse_or(&lookup, "ASSETDESK_MAX_RETRIES", defaults.max_retries),
            bulk_page_size: parse_or(&lookup, "ASSETDESK_BULK_PAGE_SIZE", defaults.bulk_page_size),
            transitions_page_size: parse_or(
                &lookup,
                "ASSETDESK_TRANSITIONS_PAGE_SIZE",
                defaults.transitions_page_size,
            ),
            versions_page_size: parse_or(
                &lookup,
                "ASSETDESK_VERSIONS_PAGE_SIZE",
                defaults.versions_page_size,
            ),
            deployed_concurrency: parse_or(
                &lookup,
                "ASSETDESK_DEPLOYED_CONCURRENCY",
                defaults.deployed_concurrency,
            ),
            transitions_max_results: parse_or(
                &lookup,
                "ASSETDESK_TRANSITIONS_MAX_RESULTS",
                defaults.transitions_max_results,
            ),
            caches: CacheSetConfig {
                site: cache("SITE", defaults.caches.site),
                list: cache("LIST", defaults.caches.list),
                items: cache("ITEMS", defaults.caches.items),
                transitions: cache("TRANSITIONS", defaults.caches.transitions),
                transition_at: cache("TRANSITION_AT", defaults.caches.transition_at),
            },
            credential_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ASSETDESK_CREDENTIAL_TIMEOUT_MS",
                defaults.credential_timeout.as_millis() as u64,
            )),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - the base URL has an http(s) scheme
    /// - page sizes, concurrency and the result cap are non-zero
    /// - every cache capacity is non-zero
    pub fn validate(&self) -> AssetdeskResult<()> {
        if !(self.graph_base_url.starts_with("https://") || self.graph_base_url.starts_with("http://"))
        {
            return Err(invalid(
                "graph_base_url",
                &self.graph_base_url,
                "graph_base_url must start with http:// or https://",
            ));
        }

        for (field, value) in [
            ("bulk_page_size", self.bulk_page_size as usize),
            ("transitions_page_size", self.transitions_page_size as usize),
            ("versions_page_size", self.versions_page_size as usize),
            ("deployed_concurrency", self.deployed_concurrency),
            ("transitions_max_results", self.transitions_max_results),
        ] {
            if value == 0 {
                return Err(invalid(field, "0", "must be greater than 0"));
            }
        }

        for (field, settings) in [
            ("caches.site", self.caches.site),
            ("caches.list", self.caches.list),
            ("caches.items", self.caches.items),
            ("caches.transitions", self.caches.transitions),
            ("caches.transition_at", self.caches.transition_at),
        ] {
            if settings.capacity == 0 {
                return Err(invalid(field, "0", "cache capacity must be greater than 0"));
            }
        }

        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> AssetdeskError {
    AssetdeskError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AccessConfig::from_lookup(|_| None);
        assert_eq!(config, AccessConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.deployed_concurrency, 10);
        assert!(!config.caches.items.is_enabled());
        assert!(config.caches.site.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = AccessConfig::from_lookup(lookup_from(&[
            ("ASSETDESK_GRAPH_BASE_URL", "https://graph.example.test/beta/"),
            ("ASSETDESK_MAX_RETRIES", "5"),
            ("ASSETDESK_DEPLOYED_CONCURRENCY", "4"),
            ("ASSETDESK_ITEMS_CACHE_TTL_SECS", "30"),
            ("ASSETDESK_TRANSITION_AT_CACHE_CAPACITY", "12"),
            ("ASSETDESK_CREDENTIAL_TIMEOUT_MS", "2500"),
        ]));
        assert_eq!(config.graph_base_url, "https://graph.example.test/beta");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.deployed_concurrency, 4);
        assert_eq!(config.caches.items.ttl, Duration::from_secs(30));
        assert_eq!(config.caches.transition_at.capacity, 12);
        assert_eq!(config.credential_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = AccessConfig::from_lookup(lookup_from(&[
            ("ASSETDESK_MAX_RETRIES", "many"),
            ("ASSETDESK_BULK_PAGE_SIZE", "-1"),
        ]));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.bulk_page_size, 100);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = AccessConfig {
            deployed_concurrency: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("deployed_concurrency"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme_and_zero_capacity() {
        let config = AccessConfig {
            graph_base_url: "graph.microsoft.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = AccessConfig::default();
        config.caches.list.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("caches.list"));
    }
}
