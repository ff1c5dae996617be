//! Name → identifier resolution for sites and lists.
//!
//! Results are cached per [`CacheSet`] instance. A lookup the upstream
//! answers with 404 becomes a [`ResolutionError`], which callers treat as
//! terminal.

use std::sync::Arc;

use assetdesk_cache::{CacheSet, ListKey};
use assetdesk_core::{AssetdeskError, AssetdeskResult, BearerToken, ResolutionError};

use crate::executor::Executor;
use crate::metrics::CallContext;
use crate::odata;
use crate::transport::UpstreamRequest;

/// Human-meaningful coordinates of a list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListLocation {
    /// e.g. `contoso.sharepoint.com`
    pub host: String,
    /// Server-relative site path, e.g. `/sites/it`
    pub site_path: String,
    /// List display name or id.
    pub list: String,
}

impl ListLocation {
    pub fn new(
        host: impl Into<String>,
        site_path: impl Into<String>,
        list: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            site_path: site_path.into(),
            list: list.into(),
        }
    }
}

/// Upstream identifiers for a list, plus its items collection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedList {
    pub site_id: String,
    pub list_id: String,
    pub items_url: String,
}

/// Resolves and caches site and list identifiers.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    executor: Executor,
    caches: Arc<CacheSet>,
    base_url: String,
}

impl IdentifierResolver {
    pub fn new(executor: Executor, caches: Arc<CacheSet>, base_url: impl Into<String>) -> Self {
        Self {
            executor,
            caches,
            base_url: base_url.into(),
        }
    }

    /// Site id for `host` + `path`.
    ///
    /// # Errors
    /// `ResolutionError::SiteNotFound` when the upstream does not know the
    /// site; transport errors otherwise.
    pub async fn site_id(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        host: &str,
        path: &str,
    ) -> AssetdeskResult<String> {
        let key = format!("{}:{}", host, path);
        if let Some(id) = self.caches.sites().get(&key) {
            return Ok(id);
        }

        let request = UpstreamRequest::get(odata::site_url(&self.base_url, host, path), credential.clone());
        let response = match self.executor.execute(ctx, &request).await {
            Ok(response) => response,
            Err(AssetdeskError::Transport(err)) if err.is_not_found() => {
                return Err(ResolutionError::SiteNotFound {
                    host: host.to_string(),
                    path: path.to_string(),
                }
                .into());
            }
            Err(err) => return Err(err),
        };

        let id = odata::decode_id(&response)?.ok_or_else(|| ResolutionError::MissingIdentifier {
            what: format!("site {}:{}", host, path),
        })?;
        tracing::debug!(host, path, site_id = %id, "Resolved site");
        self.caches.sites().set(key, id.clone());
        Ok(id)
    }

    /// List id for `list` (display name or id) within `site_id`.
    ///
    /// # Errors
    /// `ResolutionError::ListNotFound` when the upstream does not know the
    /// list; transport errors otherwise.
    pub async fn list_id(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        site_id: &str,
        list: &str,
    ) -> AssetdeskResult<String> {
        let key = ListKey {
            site_id: site_id.to_string(),
            list: list.to_string(),
        };
        if let Some(id) = self.caches.lists().get(&key) {
            return Ok(id);
        }

        let request = UpstreamRequest::get(odata::list_url(&self.base_url, site_id, list), credential.clone());
        let response = match self.executor.execute(ctx, &request).await {
            Ok(response) => response,
            Err(AssetdeskError::Transport(err)) if err.is_not_found() => {
                return Err(ResolutionError::ListNotFound {
                    site_id: site_id.to_string(),
                    list: list.to_string(),
                }
                .into());
            }
            Err(err) => return Err(err),
        };

        let id = odata::decode_id(&response)?.ok_or_else(|| ResolutionError::MissingIdentifier {
            what: format!("list {}", list),
        })?;
        tracing::debug!(site_id, list, list_id = %id, "Resolved list");
        self.caches.lists().set(key, id.clone());
        Ok(id)
    }

    /// Resolve both identifiers for `location`.
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
    ) -> AssetdeskResult<ResolvedList> {
        let site_id = self
            .site_id(ctx, credential, &location.host, &location.site_path)
            .await?;
        let list_id = self.list_id(ctx, credential, &site_id, &location.list).await?;
        let items_url = odata::items_url(&self.base_url, &site_id, &list_id);
        Ok(ResolvedList {
            site_id,
            list_id,
            items_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use crate::transport::{HttpMethod, UpstreamResponse};
    use serde_json::json;

    const BASE: &str = "https://graph.test/v1.0";

    fn resolver(transport: Arc<ScriptedTransport>) -> IdentifierResolver {
        IdentifierResolver::new(Executor::new(transport, 0), Arc::new(CacheSet::default()), BASE)
    }

    #[tokio::test]
    async fn test_resolve_caches_both_ids() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/sites/contoso.test:", UpstreamResponse::json(&json!({ "id": "site-1" })));
        transport.respond(HttpMethod::Get, "/lists/Assets", UpstreamResponse::json(&json!({ "id": "list-1" })));
        let resolver = resolver(transport.clone());
        let location = ListLocation::new("contoso.test", "/sites/it", "Assets");
        let ctx = CallContext::new("resolve");
        let token = BearerToken::new("t");

        let first = resolver.resolve(&ctx, &token, &location).await.unwrap();
        let second = resolver.resolve(&ctx, &token, &location).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.items_url, format!("{BASE}/sites/site-1/lists/list-1/items"));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_site_is_resolution_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/sites/", UpstreamResponse::new(404, "itemNotFound"));

        let err = resolver(transport)
            .site_id(&CallContext::new("resolve"), &BearerToken::new("t"), "contoso.test", "/sites/gone")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssetdeskError::Resolution(ResolutionError::SiteNotFound { .. })
        ));
        assert_eq!(err.failure_code(), "resolution_failed");
    }

    #[tokio::test]
    async fn test_unknown_list_is_resolution_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/lists/", UpstreamResponse::new(404, ""));

        let err = resolver(transport)
            .list_id(&CallContext::new("resolve"), &BearerToken::new("t"), "site-1", "Missing")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssetdeskError::Resolution(ResolutionError::ListNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/sites/", UpstreamResponse::new(403, "denied"));

        let err = resolver(transport)
            .site_id(&CallContext::new("resolve"), &BearerToken::new("t"), "contoso.test", "/sites/it")
            .await
            .unwrap_err();

        assert_eq!(err.failure_code(), "upstream_forbidden");
    }
}
