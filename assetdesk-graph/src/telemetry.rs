//! Tracing subscriber setup for binaries.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is the composition root's job.

use assetdesk_core::{AssetdeskResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. Matches every `assetdesk_*` target.
pub const DEFAULT_FILTER: &str = "assetdesk=info,warn";

/// Install a global JSON subscriber filtered by `RUST_LOG`.
///
/// Call once at startup. A second call fails because a global subscriber
/// is already set.
pub fn init_tracing() -> AssetdeskResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing".to_string(),
            value: "global subscriber".to_string(),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::debug!(filter = DEFAULT_FILTER, "Tracing initialized");
    Ok(())
}
