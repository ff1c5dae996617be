//! Cursor-driven collection reads.
//!
//! Each page is requested through the [`Executor`]; the next page is
//! requested by following the continuation link verbatim. A read ends when
//! a page carries no continuation or when the page callback says stop.

use assetdesk_core::{AssetdeskResult, BearerToken};

use crate::executor::Executor;
use crate::metrics::CallContext;
use crate::odata::{self, FromWire, Page};
use crate::transport::UpstreamRequest;

/// What to do after a page has been handed to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Continue,
    Stop,
}

/// Walks paginated collections.
#[derive(Debug, Clone)]
pub struct PageWalker {
    executor: Executor,
}

impl PageWalker {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Fetch one page.
    pub async fn fetch_page<T: FromWire>(
        &self,
        ctx: &CallContext,
        url: &str,
        credential: &BearerToken,
        headers: &[(&str, &str)],
    ) -> AssetdeskResult<Page<T>> {
        let request = UpstreamRequest::get(url, credential.clone()).with_headers(headers);
        let response = self.executor.execute(ctx, &request).await?;
        Ok(odata::decode_page(&response)?)
    }

    /// Hand every page to `on_page` until the collection is exhausted or
    /// `on_page` returns [`PageControl::Stop`]. Returns the number of pages
    /// read.
    ///
    /// A failure on any page fails the whole walk; pages already handed
    /// out are not retracted.
    pub async fn for_each_page<T, F>(
        &self,
        ctx: &CallContext,
        first_url: String,
        credential: &BearerToken,
        headers: &[(&str, &str)],
        mut on_page: F,
    ) -> AssetdeskResult<usize>
    where
        T: FromWire,
        F: FnMut(Vec<T>) -> PageControl,
    {
        let mut url = first_url;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page::<T>(ctx, &url, credential, headers).await?;
            pages += 1;

            if on_page(page.items) == PageControl::Stop {
                tracing::debug!(operation = ctx.operation(), pages, "Stopped paging early");
                return Ok(pages);
            }
            match page.cursor {
                Some(cursor) => url = cursor.as_str().to_string(),
                None => return Ok(pages),
            }
        }
    }

    /// Read every page and concatenate the entries in page order.
    pub async fn fetch_all<T: FromWire>(
        &self,
        ctx: &CallContext,
        first_url: String,
        credential: &BearerToken,
        headers: &[(&str, &str)],
    ) -> AssetdeskResult<Vec<T>> {
        let mut all = Vec::new();
        self.for_each_page(ctx, first_url, credential, headers, |items: Vec<T>| {
            all.extend(items);
            PageControl::Continue
        })
        .await?;
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use crate::transport::{HttpMethod, UpstreamResponse};
    use assetdesk_core::{AssetdeskError, ListItemRecord, TransportError};
    use serde_json::json;
    use std::sync::Arc;

    fn page(ids: &[&str], next: Option<&str>) -> UpstreamResponse {
        let value: Vec<_> = ids.iter().map(|id| json!({ "id": id, "fields": {} })).collect();
        let mut body = json!({ "value": value });
        if let Some(next) = next {
            body["@odata.nextLink"] = json!(next);
        }
        UpstreamResponse::json(&body)
    }

    fn walker(transport: Arc<ScriptedTransport>) -> PageWalker {
        PageWalker::new(Executor::new(transport, 0))
    }

    #[tokio::test]
    async fn test_follows_cursor_verbatim() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/start", page(&["1", "2"], Some("https://x/next?$skiptoken=Paged%3dTRUE")));
        transport.respond(HttpMethod::Get, "/next", page(&["3"], None));

        let records: Vec<ListItemRecord> = walker(transport.clone())
            .fetch_all(&CallContext::new("test"), "https://x/start".to_string(), &BearerToken::new("t"), &[])
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        let urls: Vec<_> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls[1], "https://x/next?$skiptoken=Paged%3dTRUE");
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_pages() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/start", page(&["1"], Some("https://x/next")));
        transport.respond(HttpMethod::Get, "/next", page(&["2"], None));

        let pages = walker(transport.clone())
            .for_each_page(
                &CallContext::new("test"),
                "https://x/start".to_string(),
                &BearerToken::new("t"),
                &[],
                |_: Vec<ListItemRecord>| PageControl::Stop,
            )
            .await
            .unwrap();

        assert_eq!(pages, 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_mid_walk_fails_whole_read() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/start", page(&["1"], Some("https://x/next")));
        transport.respond(HttpMethod::Get, "/next", UpstreamResponse::new(500, "down"));

        let result: AssetdeskResult<Vec<ListItemRecord>> = walker(transport)
            .fetch_all(&CallContext::new("test"), "https://x/start".to_string(), &BearerToken::new("t"), &[])
            .await;

        assert!(matches!(
            result,
            Err(AssetdeskError::Transport(TransportError::Upstream { status: 500, .. }))
        ));
    }

    #[tokio::test]
    async fn test_headers_sent_on_every_page() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, "/start", page(&["1"], Some("https://x/next")));
        transport.respond(HttpMethod::Get, "/next", page(&[], None));

        let _: Vec<ListItemRecord> = walker(transport.clone())
            .fetch_all(
                &CallContext::new("test"),
                "https://x/start".to_string(),
                &BearerToken::new("t"),
                &[odata::PREFER_NON_INDEXED],
            )
            .await
            .unwrap();

        for request in transport.requests() {
            assert_eq!(
                request.header("prefer"),
                Some("HonorNonIndexedQueriesWarningMayFailRandomly")
            );
        }
    }
}
