//! OData wire format: URL construction and response decoding.
//!
//! Nothing in here performs I/O.

use assetdesk_core::{
    ConcurrencyToken, Fields, Identity, ItemRevision, ListItemRecord, PageCursor, Timestamp,
    TransportError,
};
use serde::Deserialize;
use serde_json::Value;

use crate::transport::UpstreamResponse;

/// Header that lets filter/order clauses run on non-indexed columns.
pub const PREFER_NON_INDEXED: (&str, &str) =
    ("Prefer", "HonorNonIndexedQueriesWarningMayFailRandomly");

/// Item-level properties requested alongside `fields`.
const ITEM_SELECT: &str = "id,createdDateTime,lastModifiedDateTime,createdBy,lastModifiedBy,eTag";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct PageDto {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentitySetDto {
    user: Option<IdentityDto>,
    application: Option<IdentityDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDto {
    display_name: Option<String>,
    email: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDto {
    id: String,
    created_date_time: Option<Timestamp>,
    last_modified_date_time: Option<Timestamp>,
    created_by: Option<IdentitySetDto>,
    last_modified_by: Option<IdentitySetDto>,
    #[serde(rename = "eTag")]
    e_tag: Option<String>,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDto {
    id: String,
    last_modified_date_time: Timestamp,
    last_modified_by: Option<IdentitySetDto>,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Deserialize)]
struct IdDto {
    id: Option<String>,
}

impl IdentitySetDto {
    fn into_identity(self) -> Option<Identity> {
        self.user.or(self.application).map(|dto| Identity {
            display_name: dto.display_name,
            email: dto.email,
            id: dto.id,
        })
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// One decoded page: usable entries plus the continuation, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<PageCursor>,
}

/// A type that can be built from one entry of a page's `value` array.
///
/// Entries that do not decode are skipped; one malformed entry never fails
/// the page.
pub trait FromWire: Sized {
    fn from_wire(value: Value) -> Option<Self>;
}

impl FromWire for ListItemRecord {
    fn from_wire(value: Value) -> Option<Self> {
        let dto: ItemDto = serde_json::from_value(value).ok()?;
        Some(
            ListItemRecord::new(dto.id, dto.fields)
                .with_created(
                    dto.created_date_time,
                    dto.created_by.and_then(IdentitySetDto::into_identity),
                )
                .with_last_modified(
                    dto.last_modified_date_time,
                    dto.last_modified_by.and_then(IdentitySetDto::into_identity),
                )
                .with_concurrency_token(dto.e_tag.as_deref().and_then(ConcurrencyToken::parse)),
        )
    }
}

impl FromWire for ItemRevision {
    fn from_wire(value: Value) -> Option<Self> {
        let dto: VersionDto = serde_json::from_value(value).ok()?;
        Some(ItemRevision {
            version_id: dto.id,
            modified_at: dto.last_modified_date_time,
            modified_by: dto.last_modified_by.and_then(IdentitySetDto::into_identity),
            fields: dto.fields,
        })
    }
}

/// Decode a collection response.
pub fn decode_page<T: FromWire>(response: &UpstreamResponse) -> Result<Page<T>, TransportError> {
    let dto: PageDto = response.decode()?;
    let total = dto.value.len();
    let items: Vec<T> = dto.value.into_iter().filter_map(T::from_wire).collect();
    if items.len() < total {
        tracing::debug!(
            skipped = total - items.len(),
            "Skipped page entries that did not decode"
        );
    }
    Ok(Page {
        items,
        cursor: dto.next_link.map(PageCursor::new),
    })
}

/// Pull `id` out of a site, list or item response.
pub fn decode_id(response: &UpstreamResponse) -> Result<Option<String>, TransportError> {
    let dto: IdDto = response.decode()?;
    Ok(dto.id.filter(|id| !id.is_empty()))
}

/// Concurrency token from the `ETag` header, falling back to the body's
/// `eTag` / `@odata.etag` properties.
pub fn concurrency_token(response: &UpstreamResponse) -> Option<ConcurrencyToken> {
    if let Some(token) = response.header("etag").and_then(ConcurrencyToken::parse) {
        return Some(token);
    }
    let body: Value = serde_json::from_str(&response.body).ok()?;
    ["eTag", "@odata.etag"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .and_then(ConcurrencyToken::parse)
}

// ============================================================================
// URLS
// ============================================================================

/// Site lookup by hostname and server-relative path.
pub fn site_url(base: &str, host: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    let encoded: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!(
        "{}/sites/{}:/{}?$select=id",
        base,
        urlencoding::encode(host),
        encoded.join("/")
    )
}

/// List lookup by display name (or id) within a site.
pub fn list_url(base: &str, site_id: &str, list: &str) -> String {
    format!(
        "{}/sites/{}/lists/{}?$select=id",
        base,
        site_id,
        urlencoding::encode(list)
    )
}

/// Items collection of a resolved list.
pub fn items_url(base: &str, site_id: &str, list_id: &str) -> String {
    format!("{}/sites/{}/lists/{}/items", base, site_id, list_id)
}

pub fn item_url(items_url: &str, item_id: &str) -> String {
    format!("{}/{}", items_url, urlencoding::encode(item_id))
}

pub fn item_fields_url(items_url: &str, item_id: &str) -> String {
    format!("{}/fields", item_url(items_url, item_id))
}

/// Revision history of one item, newest first.
pub fn versions_url(items_url: &str, item_id: &str, top: u32, fields: &[String]) -> String {
    format!(
        "{}/versions?$top={}&$expand={}",
        item_url(items_url, item_id),
        top,
        expand_fields(fields)
    )
}

fn expand_fields(fields: &[String]) -> String {
    if fields.is_empty() {
        "fields".to_string()
    } else {
        let encoded: Vec<String> = fields
            .iter()
            .map(|f| urlencoding::encode(f).into_owned())
            .collect();
        format!("fields($select={})", encoded.join(","))
    }
}

/// Quote a string literal for a `$filter` clause.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builder for collection queries over a list's items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    top: Option<u32>,
    fields: Vec<String>,
    filter: Option<String>,
    order_by: Option<String>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    /// Restrict the expanded `fields` to these internal names.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Filter and order clauses on columns the service does not index
    /// need [`PREFER_NON_INDEXED`].
    pub fn needs_non_indexed_header(&self) -> bool {
        self.filter.is_some() || self.order_by.is_some()
    }

    /// Extra request headers this query needs.
    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        if self.needs_non_indexed_header() {
            &[PREFER_NON_INDEXED]
        } else {
            &[]
        }
    }

    pub fn build(&self, items_url: &str) -> String {
        let mut params = vec![
            format!("$select={}", ITEM_SELECT),
            format!("$expand={}", expand_fields(&self.fields)),
        ];
        if let Some(top) = self.top {
            params.push(format!("$top={}", top));
        }
        if let Some(filter) = &self.filter {
            params.push(format!("$filter={}", urlencoding::encode(filter)));
        }
        if let Some(order_by) = &self.order_by {
            params.push(format!("$orderby={}", urlencoding::encode(order_by)));
        }
        format!("{}?{}", items_url, params.join("&"))
    }
}
