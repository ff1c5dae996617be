//! Downstream credential acquisition.
//!
//! The exchange protocol itself belongs to the caller; this module only
//! defines the seam and bounds how long the access layer waits on it.

use std::time::Duration;

use assetdesk_core::{AssetdeskResult, BearerToken, CredentialError};
use async_trait::async_trait;

/// Turns the caller's inbound credential into one the upstream accepts.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, inbound: &str, scopes: &[String]) -> AssetdeskResult<BearerToken>;
}

/// Hands back the same token for every request.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: BearerToken,
}

impl StaticCredential {
    pub fn new(token: BearerToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialExchange for StaticCredential {
    async fn exchange(&self, _inbound: &str, _scopes: &[String]) -> AssetdeskResult<BearerToken> {
        Ok(self.token.clone())
    }
}

/// Run `exchange`, giving up after `timeout`.
///
/// # Errors
/// `CredentialError::TimedOut` when the exchange does not finish in time,
/// and `CredentialError::ExchangeFailed` when it returns an empty token.
/// Errors from the exchange itself pass through.
pub async fn acquire_credential(
    exchange: &dyn CredentialExchange,
    inbound: &str,
    scopes: &[String],
    timeout: Duration,
) -> AssetdeskResult<BearerToken> {
    let token = match tokio::time::timeout(timeout, exchange.exchange(inbound, scopes)).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Credential exchange timed out");
            return Err(CredentialError::TimedOut { timeout }.into());
        }
    };

    if token.is_empty() {
        return Err(CredentialError::ExchangeFailed {
            reason: "exchange returned an empty token".to_string(),
        }
        .into());
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetdesk_core::AssetdeskError;

    struct SlowExchange(Duration);

    #[async_trait]
    impl CredentialExchange for SlowExchange {
        async fn exchange(&self, _inbound: &str, _scopes: &[String]) -> AssetdeskResult<BearerToken> {
            tokio::time::sleep(self.0).await;
            Ok(BearerToken::new("late"))
        }
    }

    struct FailingExchange;

    #[async_trait]
    impl CredentialExchange for FailingExchange {
        async fn exchange(&self, _inbound: &str, _scopes: &[String]) -> AssetdeskResult<BearerToken> {
            Err(CredentialError::ExchangeFailed {
                reason: "invalid_grant".to_string(),
            }
            .into())
        }
    }

    fn scopes() -> Vec<String> {
        vec!["Sites.ReadWrite.All".to_string()]
    }

    #[tokio::test]
    async fn test_static_credential() {
        let exchange = StaticCredential::new(BearerToken::new("downstream"));
        let token = acquire_credential(&exchange, "inbound", &scopes(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(token.expose(), "downstream");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let exchange = SlowExchange(Duration::from_secs(30));
        let err = acquire_credential(&exchange, "inbound", &scopes(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssetdeskError::Credential(CredentialError::TimedOut { .. })
        ));
        assert_eq!(err.failure_code(), "credential_unavailable");
    }

    #[tokio::test]
    async fn test_exchange_error_passes_through() {
        let err = acquire_credential(&FailingExchange, "inbound", &scopes(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssetdeskError::Credential(CredentialError::ExchangeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let exchange = StaticCredential::new(BearerToken::new(""));
        let result = acquire_credential(&exchange, "inbound", &scopes(), Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
