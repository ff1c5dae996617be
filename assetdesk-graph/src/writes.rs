//! Conditional writes.
//!
//! Updates and deletes carry the caller's concurrency token as `If-Match`;
//! a 412 comes back as [`WriteError::ConcurrencyConflict`] and is never
//! retried here. Throttling is still handled by the [`Executor`].

use assetdesk_core::{
    AssetdeskError, AssetdeskResult, BearerToken, ConcurrencyToken, Fields, TransportError,
    WriteError, WriteOutcome,
};
use serde_json::{json, Value};

use crate::executor::Executor;
use crate::metrics::CallContext;
use crate::odata;
use crate::resolver::ResolvedList;
use crate::transport::UpstreamRequest;

/// Status the upstream uses for a failed `If-Match` precondition.
const PRECONDITION_FAILED: u16 = 412;

/// Performs updates, creates and deletes against one list.
#[derive(Debug, Clone)]
pub struct WriteCoordinator {
    executor: Executor,
}

impl WriteCoordinator {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Patch `item_id`'s fields.
    ///
    /// Without a token the write is unconditional. The returned token comes
    /// from the response when present, otherwise from one follow-up read;
    /// `None` means it could not be determined.
    ///
    /// # Errors
    /// `WriteError::ConcurrencyConflict` when the item no longer matches
    /// `token`.
    pub async fn update(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        item_id: &str,
        patch: &Fields,
        token: Option<&ConcurrencyToken>,
    ) -> AssetdeskResult<WriteOutcome> {
        let request = conditional(
            UpstreamRequest::patch(
                odata::item_fields_url(&list.items_url, item_id),
                credential.clone(),
                Value::Object(patch.clone()),
            ),
            token,
        );
        let response = self
            .executor
            .execute(ctx, &request)
            .await
            .map_err(|err| conflict_or(err, item_id))?;

        let concurrency_token = match odata::concurrency_token(&response) {
            Some(token) => Some(token),
            None => self.follow_up_token(ctx, credential, list, item_id).await,
        };
        tracing::debug!(
            operation = ctx.operation(),
            item_id,
            token_known = concurrency_token.is_some(),
            "Item updated"
        );
        Ok(WriteOutcome {
            concurrency_token,
            assigned_id: None,
        })
    }

    /// Create an item with `fields`.
    ///
    /// # Errors
    /// `WriteError::MissingAssignedId` when the upstream accepts the item
    /// but does not report its identifier.
    pub async fn create(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        fields: &Fields,
    ) -> AssetdeskResult<WriteOutcome> {
        let request = UpstreamRequest::post(
            list.items_url.clone(),
            credential.clone(),
            json!({ "fields": fields }),
        );
        let response = self.executor.execute(ctx, &request).await?;

        let assigned_id = odata::decode_id(&response)?.ok_or(WriteError::MissingAssignedId)?;
        tracing::debug!(operation = ctx.operation(), item_id = %assigned_id, "Item created");
        Ok(WriteOutcome {
            concurrency_token: odata::concurrency_token(&response),
            assigned_id: Some(assigned_id),
        })
    }

    /// Delete `item_id`, conditionally when a token is supplied.
    pub async fn delete(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        item_id: &str,
        token: Option<&ConcurrencyToken>,
    ) -> AssetdeskResult<()> {
        let request = conditional(
            UpstreamRequest::delete(odata::item_url(&list.items_url, item_id), credential.clone()),
            token,
        );
        self.executor
            .execute(ctx, &request)
            .await
            .map_err(|err| conflict_or(err, item_id))?;
        tracing::debug!(operation = ctx.operation(), item_id, "Item deleted");
        Ok(())
    }

    async fn follow_up_token(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        item_id: &str,
    ) -> Option<ConcurrencyToken> {
        let url = format!("{}?$select=id,eTag", odata::item_url(&list.items_url, item_id));
        let request = UpstreamRequest::get(url, credential.clone());
        match self.executor.execute(&ctx.child("read_concurrency_token"), &request).await {
            Ok(response) => odata::concurrency_token(&response),
            Err(err) => {
                tracing::debug!(item_id, error = %err, "Follow-up read for concurrency token failed");
                None
            }
        }
    }
}

fn conditional(request: UpstreamRequest, token: Option<&ConcurrencyToken>) -> UpstreamRequest {
    match token {
        Some(token) => request.with_header("If-Match", token.header_value()),
        None => request,
    }
}

fn conflict_or(err: AssetdeskError, item_id: &str) -> AssetdeskError {
    match err {
        AssetdeskError::Transport(TransportError::Upstream {
            status: PRECONDITION_FAILED,
            ..
        }) => WriteError::ConcurrencyConflict {
            item_id: item_id.to_string(),
        }
        .into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use crate::transport::{HttpMethod, UpstreamResponse};
    use std::sync::Arc;

    fn list() -> ResolvedList {
        ResolvedList {
            site_id: "s1".to_string(),
            list_id: "l1".to_string(),
            items_url: "https://graph.test/sites/s1/lists/l1/items".to_string(),
        }
    }

    fn coordinator(transport: Arc<ScriptedTransport>) -> WriteCoordinator {
        WriteCoordinator::new(Executor::new(transport, 3))
    }

    fn patch() -> Fields {
        let mut fields = Fields::new();
        fields.insert("Status".to_string(), json!("Retired"));
        fields
    }

    #[tokio::test]
    async fn test_update_uses_etag_header() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Patch,
            "/items/7/fields",
            UpstreamResponse::new(200, "{}").with_header("ETag", "\"T2\""),
        );

        let outcome = coordinator(transport.clone())
            .update(
                &CallContext::new("update"),
                &BearerToken::new("t"),
                &list(),
                "7",
                &patch(),
                Some(&ConcurrencyToken::version("\"T1\"")),
            )
            .await
            .unwrap();

        assert_eq!(outcome.concurrency_token, Some(ConcurrencyToken::version("\"T2\"")));
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("If-Match"), Some("\"T1\""));
        assert_eq!(sent[0].body, Some(json!({ "Status": "Retired" })));
    }

    #[tokio::test]
    async fn test_update_without_token_sends_no_precondition() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Patch,
            "/items/7/fields",
            UpstreamResponse::new(200, "{}").with_header("ETag", "\"T2\""),
        );

        coordinator(transport.clone())
            .update(&CallContext::new("update"), &BearerToken::new("t"), &list(), "7", &patch(), None)
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].header("If-Match"), None);
    }

    #[tokio::test]
    async fn test_precondition_failure_is_conflict_and_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Patch,
            "/items/7/fields",
            UpstreamResponse::new(412, "precondition failed"),
        );

        let err = coordinator(transport.clone())
            .update(
                &CallContext::new("update"),
                &BearerToken::new("t"),
                &list(),
                "7",
                &patch(),
                Some(&ConcurrencyToken::version("\"stale\"")),
            )
            .await
            .unwrap_err();

        assert!(err.is_concurrency_conflict());
        assert_eq!(err.failure_code(), "stale_data");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_after_follow_up_is_unknown() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Patch, "/items/7/fields", UpstreamResponse::new(204, ""));
        transport.respond(HttpMethod::Get, "/items/7", UpstreamResponse::new(500, ""));

        let outcome = coordinator(transport.clone())
            .update(&CallContext::new("update"), &BearerToken::new("t"), &list(), "7", &patch(), None)
            .await
            .unwrap();

        assert_eq!(outcome.concurrency_token, None);
        assert_eq!(transport.requests_matching(HttpMethod::Get, "/items/7").len(), 1);
    }

    #[tokio::test]
    async fn test_create_returns_assigned_id() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            "/items",
            UpstreamResponse::new(201, r#"{"id":"42","eTag":"\"T1\""}"#),
        );

        let outcome = coordinator(transport.clone())
            .create(&CallContext::new("create"), &BearerToken::new("t"), &list(), &patch())
            .await
            .unwrap();

        assert_eq!(outcome.assigned_id.as_deref(), Some("42"));
        assert_eq!(outcome.concurrency_token, Some(ConcurrencyToken::version("\"T1\"")));
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({ "fields": { "Status": "Retired" } }))
        );
    }

    #[tokio::test]
    async fn test_create_without_id_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Post, "/items", UpstreamResponse::new(201, "{}"));

        let err = coordinator(transport)
            .create(&CallContext::new("create"), &BearerToken::new("t"), &list(), &patch())
            .await
            .unwrap_err();

        assert!(matches!(err, AssetdeskError::Write(WriteError::MissingAssignedId)));
    }

    #[tokio::test]
    async fn test_delete_with_wildcard() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Delete, "/items/7", UpstreamResponse::new(204, ""));

        coordinator(transport.clone())
            .delete(
                &CallContext::new("delete"),
                &BearerToken::new("t"),
                &list(),
                "7",
                Some(&ConcurrencyToken::Any),
            )
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].header("If-Match"), Some("*"));
    }
}
