//! Records returned by the upstream list service.
//!
//! Everything here is immutable once constructed: the access layer hands
//! records to callers and callers derive new values instead of editing
//! them in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Raw field map of a list item, keyed by upstream internal field name.
pub type Fields = serde_json::Map<String, Value>;

/// The person (or app) that created or last touched a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub id: Option<String>,
}

/// One upstream list item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItemRecord {
    id: String,
    created_at: Option<Timestamp>,
    last_modified_at: Option<Timestamp>,
    created_by: Option<Identity>,
    last_modified_by: Option<Identity>,
    fields: Fields,
    concurrency_token: Option<ConcurrencyToken>,
}

impl ListItemRecord {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            last_modified_at: None,
            created_by: None,
            last_modified_by: None,
            fields,
            concurrency_token: None,
        }
    }

    pub fn with_created(mut self, at: Option<Timestamp>, by: Option<Identity>) -> Self {
        self.created_at = at;
        self.created_by = by;
        self
    }

    pub fn with_last_modified(mut self, at: Option<Timestamp>, by: Option<Identity>) -> Self {
        self.last_modified_at = at;
        self.last_modified_by = by;
        self
    }

    pub fn with_concurrency_token(mut self, token: Option<ConcurrencyToken>) -> Self {
        self.concurrency_token = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    pub fn last_modified_at(&self) -> Option<Timestamp> {
        self.last_modified_at
    }

    pub fn created_by(&self) -> Option<&Identity> {
        self.created_by.as_ref()
    }

    pub fn last_modified_by(&self) -> Option<&Identity> {
        self.last_modified_by.as_ref()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn concurrency_token(&self) -> Option<&ConcurrencyToken> {
        self.concurrency_token.as_ref()
    }

    /// Raw value of an internal field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String value of an internal field, if it holds a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// True when the field currently holds `expected`.
    pub fn field_equals(&self, name: &str, expected: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|value| value_matches(value, expected))
    }

    /// Timestamp used for presentation ordering: last-modified, falling
    /// back to created.
    pub fn sort_timestamp(&self) -> Option<Timestamp> {
        self.last_modified_at.or(self.created_at)
    }
}

/// One entry of an item's revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRevision {
    pub version_id: String,
    pub modified_at: Timestamp,
    pub modified_by: Option<Identity>,
    pub fields: Fields,
}

impl ItemRevision {
    pub fn field_equals(&self, name: &str, expected: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|value| value_matches(value, expected))
    }
}

/// A record confirmed to have entered a state at `transitioned_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionedItem<T = ListItemRecord> {
    pub item: T,
    pub transitioned_at: Timestamp,
}

impl<T> TransitionedItem<T> {
    pub fn map<U, F>(self, f: F) -> TransitionedItem<U>
    where
        F: FnOnce(T) -> U,
    {
        TransitionedItem {
            item: f(self.item),
            transitioned_at: self.transitioned_at,
        }
    }
}

/// Compare a raw field value against a textual state.
///
/// Choice and text columns arrive as strings; number and boolean columns
/// are compared through their JSON rendering.
pub fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

// ============================================================================
// CONCURRENCY TOKENS
// ============================================================================

/// Opaque version marker used for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyToken {
    /// Force the write regardless of the item's current version.
    Any,
    /// Fail the write if the item no longer carries this version.
    Version(String),
}

impl ConcurrencyToken {
    pub fn version(token: impl Into<String>) -> Self {
        Self::Version(token.into())
    }

    /// Parse a header or body value; `*` is the wildcard.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        match trimmed {
            "" => None,
            "*" => Some(Self::Any),
            other => Some(Self::Version(other.to_string())),
        }
    }

    /// Value for an `If-Match` header.
    pub fn header_value(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Version(v) => v,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl std::fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header_value())
    }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// New version of the item; `None` means unknown.
    pub concurrency_token: Option<ConcurrencyToken>,
    /// Identifier assigned by the upstream (creates only).
    pub assigned_id: Option<String>,
}

/// Continuation cursor: the next-page URL exactly as the upstream sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(next_link: impl Into<String>) -> Self {
        Self(next_link.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
