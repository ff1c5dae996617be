//! Conditional writes through the client facade.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetdesk_test_utils::*;
use serde_json::json;

fn fields_fragment(id: &str) -> String {
    format!("{}/fields", item_fragment(id))
}

fn retire() -> Fields {
    let mut patch = Fields::new();
    patch.insert("status".to_string(), json!("Retired"));
    patch
}

/// Scripts item 7 as an upstream that enforces `If-Match` against a
/// version counter, starting at `"7,1"`.
fn versioned_item(transport: &ScriptedTransport) -> Arc<Mutex<u32>> {
    let version = Arc::new(Mutex::new(1u32));
    let current = version.clone();
    transport.respond_with(HttpMethod::Patch, &fields_fragment("7"), move |request| {
        let mut current = current.lock().unwrap();
        let expected = format!("\"7,{}\"", *current);
        match request.header("If-Match") {
            Some(given) if given != "*" && given != expected => {
                Ok(UpstreamResponse::new(412, r#"{"error":{"code":"preconditionFailed"}}"#))
            }
            _ => {
                *current += 1;
                Ok(UpstreamResponse::new(200, "{}")
                    .with_header("ETag", &format!("\"7,{}\"", *current)))
            }
        }
    });
    version
}

async fn update(
    client: &AssetListClient,
    token: Option<&ConcurrencyToken>,
) -> AssetdeskResult<WriteOutcome> {
    client
        .update_item(
            &CallContext::new("update_item"),
            &credential(),
            &location(),
            "7",
            &retire(),
            token,
        )
        .await
}

#[tokio::test]
async fn test_second_writer_with_stale_token_conflicts() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    versioned_item(&transport);
    let client = test_client(transport.clone(), test_config());
    let read_token = ConcurrencyToken::version("\"7,1\"");

    let first = update(&client, Some(&read_token)).await.unwrap();
    assert_eq!(first.concurrency_token, Some(ConcurrencyToken::version("\"7,2\"")));

    let err = update(&client, Some(&read_token)).await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(err.failure_code(), "stale_data");
    assert!(matches!(
        err,
        AssetdeskError::Write(WriteError::ConcurrencyConflict { ref item_id }) if item_id == "7"
    ));
    // A conflict is not retried.
    assert_eq!(transport.requests_matching(HttpMethod::Patch, "/items/7").len(), 2);
}

#[tokio::test]
async fn test_fresh_token_after_conflict_succeeds() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    versioned_item(&transport);
    let client = test_client(transport, test_config());

    let first = update(&client, Some(&ConcurrencyToken::version("\"7,1\""))).await.unwrap();
    let second = update(&client, first.concurrency_token.as_ref()).await.unwrap();

    assert_eq!(second.concurrency_token, Some(ConcurrencyToken::version("\"7,3\"")));
}

#[tokio::test]
async fn test_wildcard_token_forces_write() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    let version = versioned_item(&transport);
    let client = test_client(transport.clone(), test_config());

    update(&client, Some(&ConcurrencyToken::Any)).await.unwrap();

    assert_eq!(*version.lock().unwrap(), 2);
    let sent = transport.requests_matching(HttpMethod::Patch, "/items/7");
    assert_eq!(sent[0].header("If-Match"), Some("*"));
}

#[tokio::test]
async fn test_update_without_token_sends_no_precondition() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    versioned_item(&transport);
    let client = test_client(transport.clone(), test_config());

    update(&client, None).await.unwrap();

    let sent = transport.requests_matching(HttpMethod::Patch, "/items/7");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].header("If-Match").is_none());
    assert_eq!(sent[0].body, Some(json!({ "Status": "Retired" })));
}

#[tokio::test]
async fn test_missing_etag_falls_back_to_follow_up_read() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(
        HttpMethod::Patch,
        &fields_fragment("7"),
        UpstreamResponse::new(200, "{}"),
    );
    transport.respond(
        HttpMethod::Get,
        &item_fragment("7"),
        UpstreamResponse::json(&json!({ "id": "7", "eTag": "\"7,5\"" })),
    );
    let client = test_client(transport.clone(), test_config());

    let outcome = update(&client, None).await.unwrap();

    assert_eq!(outcome.concurrency_token, Some(ConcurrencyToken::version("\"7,5\"")));
    let reads = transport.requests_matching(HttpMethod::Get, &item_fragment("7"));
    assert_eq!(reads.len(), 1);
    assert!(reads[0].url.contains("$select=id,eTag"));
}

#[tokio::test]
async fn test_unknown_token_is_not_an_error() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(
        HttpMethod::Patch,
        &fields_fragment("7"),
        UpstreamResponse::new(200, "{}"),
    );
    transport.respond(
        HttpMethod::Get,
        &item_fragment("7"),
        UpstreamResponse::new(500, "unavailable"),
    );
    let client = test_client(transport, test_config());

    let outcome = update(&client, None).await.unwrap();
    assert!(outcome.concurrency_token.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_throttled_write_is_retried() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(HttpMethod::Patch, &fields_fragment("7"), throttled(429, Some("2")));
    transport.respond(
        HttpMethod::Patch,
        &fields_fragment("7"),
        UpstreamResponse::new(200, "{}").with_header("ETag", "\"7,2\""),
    );
    let sink = Arc::new(RecordingSink::new());
    let client = test_client(transport.clone(), test_config());

    let started = tokio::time::Instant::now();
    let outcome = client
        .update_item(
            &CallContext::new("update_item").with_sink(sink.clone()),
            &credential(),
            &location(),
            "7",
            &retire(),
            Some(&ConcurrencyToken::version("\"7,1\"")),
        )
        .await
        .unwrap();

    assert_eq!(outcome.concurrency_token, Some(ConcurrencyToken::version("\"7,2\"")));
    assert!(started.elapsed() >= Duration::from_secs(2));
    let patches = transport.requests_matching(HttpMethod::Patch, "/items/7");
    assert_eq!(patches.len(), 2);
    assert!(patches.iter().all(|r| r.header("If-Match") == Some("\"7,1\"")));
    assert!(sink.reports().iter().any(|r| r.retries == 1));
}

#[tokio::test]
async fn test_create_reports_assigned_id_and_token() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(
        HttpMethod::Post,
        ITEMS_FRAGMENT,
        UpstreamResponse::new(201, r#"{"id":"42","eTag":"\"42,1\""}"#),
    );
    let client = test_client(transport.clone(), test_config());

    let mut fields = Fields::new();
    fields.insert("assetTag".to_string(), json!("TAG-42"));
    fields.insert("status".to_string(), json!("Deployed"));
    let outcome = client
        .create_item(&CallContext::new("create_item"), &credential(), &location(), &fields)
        .await
        .unwrap();

    assert_eq!(outcome.assigned_id.as_deref(), Some("42"));
    assert_eq!(outcome.concurrency_token, Some(ConcurrencyToken::version("\"42,1\"")));
    let posted = transport.requests_matching(HttpMethod::Post, ITEMS_FRAGMENT);
    assert_eq!(
        posted[0].body,
        Some(json!({ "fields": { "AssetTag": "TAG-42", "Status": "Deployed" } }))
    );
}

#[tokio::test]
async fn test_create_without_id_is_an_error() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(
        HttpMethod::Post,
        ITEMS_FRAGMENT,
        UpstreamResponse::new(201, "{}"),
    );
    let client = test_client(transport, test_config());

    let err = client
        .create_item(&CallContext::new("create_item"), &credential(), &location(), &Fields::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AssetdeskError::Write(WriteError::MissingAssignedId)));
}

#[tokio::test]
async fn test_conditional_delete() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond_with(HttpMethod::Delete, &item_fragment("7"), |request| {
        match request.header("If-Match") {
            Some("\"7,1\"") | None => Ok(UpstreamResponse::new(204, "")),
            Some(_) => Ok(UpstreamResponse::new(412, "")),
        }
    });
    let client = test_client(transport, test_config());
    let ctx = CallContext::new("delete_item");

    let stale = ConcurrencyToken::version("\"7,0\"");
    let err = client
        .delete_item(&ctx, &credential(), &location(), "7", Some(&stale))
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict());

    let current = ConcurrencyToken::version("\"7,1\"");
    client
        .delete_item(&ctx, &credential(), &location(), "7", Some(&current))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_successful_write_invalidates_item_snapshots() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(
        HttpMethod::Get,
        ITEMS_FRAGMENT,
        page_response(
            vec![item_json("7", at(1), json!({ "AssetTag": "TAG-7", "Status": "Deployed" }))],
            None,
        ),
    );
    versioned_item(&transport);
    let mut config = test_config();
    config.caches.items = CacheSettings::new(Duration::from_secs(60), 4);
    let client = test_client(transport.clone(), config);
    let ctx = CallContext::new("list_items");
    let item_reads = || transport.requests_matching(HttpMethod::Get, ITEMS_FRAGMENT).len();

    client.list_items(&ctx, &credential(), &location()).await.unwrap();
    client.list_items(&ctx, &credential(), &location()).await.unwrap();
    assert_eq!(item_reads(), 1);

    update(&client, None).await.unwrap();
    client.list_items(&ctx, &credential(), &location()).await.unwrap();
    assert_eq!(item_reads(), 2);
}

#[tokio::test]
async fn test_failed_write_keeps_item_snapshots() {
    let transport = Arc::new(ScriptedTransport::new());
    script_resolution(&transport);
    transport.respond(HttpMethod::Get, ITEMS_FRAGMENT, page_response(Vec::new(), None));
    versioned_item(&transport);
    let mut config = test_config();
    config.caches.items = CacheSettings::new(Duration::from_secs(60), 4);
    let client = test_client(transport.clone(), config);
    let ctx = CallContext::new("list_items");

    client.list_items(&ctx, &credential(), &location()).await.unwrap();
    update(&client, Some(&ConcurrencyToken::version("\"7,9\""))).await.unwrap_err();
    client.list_items(&ctx, &credential(), &location()).await.unwrap();

    assert_eq!(transport.requests_matching(HttpMethod::Get, ITEMS_FRAGMENT).len(), 1);
}
