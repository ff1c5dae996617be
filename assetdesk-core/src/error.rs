//! Error types for Assetdesk operations

use std::time::Duration;
use thiserror::Error;

/// Transport-level failures: anything that happened while talking to the
/// upstream list service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Upstream still throttling after {attempts} attempts (last status {last_status})")]
    ExceededRetries { last_status: u16, attempts: u32 },

    #[error("Upstream rejected request with status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Network failure: {reason}")]
    Network { reason: String },

    #[error("Invalid response from upstream: {reason}")]
    InvalidResponse { reason: String },
}

impl TransportError {
    /// HTTP status carried by the error, if the upstream produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ExceededRetries { last_status, .. } => Some(*last_status),
            Self::Upstream { status, .. } => Some(*status),
            Self::Network { .. } | Self::InvalidResponse { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Failures resolving human-meaningful names to upstream identifiers.
///
/// These are terminal: every dependent operation fails fast instead of
/// returning an empty result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Site not found: {host}:{path}")]
    SiteNotFound { host: String, path: String },

    #[error("List not found: {list} on site {site_id}")]
    ListNotFound { site_id: String, list: String },

    #[error("Upstream returned no identifier for {what}")]
    MissingIdentifier { what: String },
}

/// Conditional-write failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("Concurrency conflict on item {item_id}: the item changed since it was read")]
    ConcurrencyConflict { item_id: String },

    #[error("Create returned no item identifier")]
    MissingAssignedId,
}

/// A raw record that could not be turned into a domain value.
///
/// Bulk reads and derived queries drop the offending record; this error is
/// never surfaced from those operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Credential exchange errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential exchange failed: {reason}")]
    ExchangeFailed { reason: String },

    #[error("Credential exchange timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

/// Master error type for all Assetdesk errors.
#[derive(Debug, Clone, Error)]
pub enum AssetdeskError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

impl AssetdeskError {
    /// Stable failure code for the caller layer to map onto responses.
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::ExceededRetries { .. }) => "upstream_throttled",
            Self::Transport(TransportError::Upstream { status: 404, .. }) => "upstream_not_found",
            Self::Transport(TransportError::Upstream { status: 401 | 403, .. }) => {
                "upstream_forbidden"
            }
            Self::Transport(TransportError::Upstream { .. }) => "upstream_rejected",
            Self::Transport(TransportError::Network { .. }) => "upstream_unreachable",
            Self::Transport(TransportError::InvalidResponse { .. }) => "upstream_invalid_response",
            Self::Resolution(_) => "resolution_failed",
            Self::Write(WriteError::ConcurrencyConflict { .. }) => "stale_data",
            Self::Write(WriteError::MissingAssignedId) => "upstream_invalid_response",
            Self::Mapping(_) => "invalid_record",
            Self::Config(_) => "misconfigured",
            Self::Credential(_) => "credential_unavailable",
        }
    }

    /// True when the caller should re-read the item and re-apply its change.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Write(WriteError::ConcurrencyConflict { .. }))
    }
}

/// Result type alias for Assetdesk operations.
pub type AssetdeskResult<T> = Result<T, AssetdeskError>;

// =============================================================================
// TESTS
// =============================================================================
