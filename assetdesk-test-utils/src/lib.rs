//! Assetdesk Test Utilities
//!
//! Shared infrastructure for the integration tests:
//! - Canonical site/list coordinates and a scripted resolution
//! - JSON builders for item pages and revision histories
//! - A recording metrics sink and a sample domain mapper
//! - Proptest generators

use std::sync::{Arc, Mutex};

pub use assetdesk_core::{
    AccessConfig, AssetdeskError, AssetdeskResult, BearerToken, CacheSetConfig, CacheSettings,
    ConcurrencyToken, FieldMap, Fields, ListItemRecord, MappingError, RecordMapper, Timestamp,
    TransportError, WriteError, WriteOutcome,
};
pub use assetdesk_graph::{
    AssetListClient, CallContext, CallReport, HttpMethod, ListLocation, MetricsSink,
    ScriptedTransport, UpstreamRequest, UpstreamResponse,
};

pub use assetdesk_cache::CacheSet;

use assetdesk_graph::CallOutcome;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// COORDINATES
// ============================================================================

pub const BASE_URL: &str = "https://graph.test/v1.0";
pub const HOST: &str = "contoso.test";
pub const SITE_PATH: &str = "/sites/it";
pub const LIST: &str = "Assets";
pub const SITE_ID: &str = "site-1";
pub const LIST_ID: &str = "list-1";

/// URL fragment matching the test list's items collection.
pub const ITEMS_FRAGMENT: &str = "/lists/list-1/items";

pub fn location() -> ListLocation {
    ListLocation::new(HOST, SITE_PATH, LIST)
}

pub fn items_url() -> String {
    format!("{}/sites/{}/lists/{}/items", BASE_URL, SITE_ID, LIST_ID)
}

/// URL fragment matching one item's revision history. Longer than
/// [`ITEMS_FRAGMENT`], so it wins over the collection route.
pub fn versions_fragment(item_id: &str) -> String {
    format!("{}/{}/versions", ITEMS_FRAGMENT, item_id)
}

/// URL fragment matching one item (reads, deletes, field patches).
pub fn item_fragment(item_id: &str) -> String {
    format!("{}/{}", ITEMS_FRAGMENT, item_id)
}

pub fn credential() -> BearerToken {
    BearerToken::new("test-token")
}

/// Script the site and list lookups for [`location`].
pub fn script_resolution(transport: &ScriptedTransport) {
    transport.respond(
        HttpMethod::Get,
        &format!("/sites/{}:", HOST),
        UpstreamResponse::json(&json!({ "id": SITE_ID })),
    );
    transport.respond(
        HttpMethod::Get,
        &format!("/lists/{}?", LIST),
        UpstreamResponse::json(&json!({ "id": LIST_ID })),
    );
}

// ============================================================================
// CLIENT FIXTURES
// ============================================================================

/// Defaults pointed at [`BASE_URL`].
pub fn test_config() -> AccessConfig {
    AccessConfig {
        graph_base_url: BASE_URL.to_string(),
        ..Default::default()
    }
}

pub fn field_map() -> FieldMap {
    FieldMap::new()
        .with("assetTag", "AssetTag")
        .with("status", "Status")
        .with("title", "Title")
}

/// Client over `transport` with a fresh cache set sized from `config`.
pub fn test_client(transport: Arc<ScriptedTransport>, config: AccessConfig) -> AssetListClient {
    let caches = Arc::new(CacheSet::new(&config.caches));
    AssetListClient::new(config, transport, caches, field_map()).expect("test config must validate")
}

// ============================================================================
// JSON BUILDERS
// ============================================================================

/// Fixed origin for test timestamps.
pub fn origin() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// `origin() + minutes`.
pub fn at(minutes: i64) -> Timestamp {
    origin() + Duration::minutes(minutes)
}

/// One item as the upstream serialises it.
pub fn item_json(id: &str, modified: Timestamp, fields: Value) -> Value {
    json!({
        "id": id,
        "eTag": format!("\"{},1\"", id),
        "createdDateTime": origin(),
        "lastModifiedDateTime": modified,
        "createdBy": { "user": { "displayName": "Fixture", "email": "fixture@contoso.test" } },
        "lastModifiedBy": { "user": { "displayName": "Fixture", "email": "fixture@contoso.test" } },
        "fields": fields,
    })
}

/// One revision as the upstream serialises it.
pub fn version_json(version: &str, modified: Timestamp, fields: Value) -> Value {
    json!({
        "id": version,
        "lastModifiedDateTime": modified,
        "lastModifiedBy": { "user": { "displayName": "Fixture" } },
        "fields": fields,
    })
}

/// A collection page, optionally pointing at a next page.
pub fn page_response(values: Vec<Value>, next_link: Option<&str>) -> UpstreamResponse {
    let mut body = json!({ "value": values });
    if let Some(next) = next_link {
        body["@odata.nextLink"] = json!(next);
    }
    UpstreamResponse::json(&body)
}

/// Revision history in newest-first order: `(minute, state)` pairs.
pub fn history_response(field: &str, revisions: &[(i64, &str)]) -> UpstreamResponse {
    let count = revisions.len();
    let values = revisions
        .iter()
        .enumerate()
        .map(|(i, (minute, state))| {
            version_json(&format!("{}.0", count - i), at(*minute), json!({ field: state }))
        })
        .collect();
    page_response(values, None)
}

/// Throttle response, optionally with a `Retry-After` hint.
pub fn throttled(status: u16, retry_after: Option<&str>) -> UpstreamResponse {
    let response = UpstreamResponse::new(status, r#"{"error":{"code":"TooManyRequests"}}"#);
    match retry_after {
        Some(value) => response.with_header("Retry-After", value),
        None => response,
    }
}

// ============================================================================
// OBSERVERS AND MAPPERS
// ============================================================================

/// Sink that keeps every report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<CallReport>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CallReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> usize {
        self.reports()
            .iter()
            .filter(|r| r.outcome != CallOutcome::Success)
            .count()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, report: &CallReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}

/// Minimal domain record used to exercise mapped reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub tag: String,
    pub status: Option<String>,
}

/// Requires `AssetTag`; `Status` is optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetMapper;

impl RecordMapper for AssetMapper {
    type Output = Asset;

    fn map_record(&self, record: &ListItemRecord) -> Result<Asset, MappingError> {
        let tag = record
            .field_str("AssetTag")
            .ok_or_else(|| MappingError::RequiredFieldMissing {
                field: "AssetTag".to_string(),
            })?;
        Ok(Asset {
            id: record.id().to_string(),
            tag: tag.to_string(),
            status: record.field_str("Status").map(str::to_string),
        })
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

/// Newest-first history as "in target state?" flags.
pub fn arb_state_history(max_len: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 0..=max_len)
}

/// Collection size and page size for paging properties.
pub fn arb_paging() -> impl Strategy<Value = (usize, usize)> {
    (0usize..250, 1usize..60)
}

/// Printable state names like the ones list columns carry.
pub fn arb_state_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,8})?"
}
