//! Field-name table and the domain-mapping seam.
//!
//! The upstream list uses internal column names (`Status0`, `field_3`, …)
//! that have nothing to do with the names the application uses. A
//! [`FieldMap`] is the static translation table; a [`RecordMapper`] turns a
//! raw record into whatever domain value the caller works with.

use std::collections::BTreeMap;

use crate::error::MappingError;
use crate::record::ListItemRecord;

/// Static translation of domain field names to upstream internal names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: BTreeMap<String, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, replacing any previous one for `domain`.
    pub fn with(mut self, domain: impl Into<String>, internal: impl Into<String>) -> Self {
        self.entries.insert(domain.into(), internal.into());
        self
    }

    /// Internal name for a domain field. Unmapped names pass through
    /// unchanged, since many columns keep their display name internally.
    pub fn internal<'a>(&'a self, domain: &'a str) -> &'a str {
        self.entries.get(domain).map(String::as_str).unwrap_or(domain)
    }

    /// Internal names of every mapped field, for `$select` lists.
    pub fn internal_names(&self) -> Vec<&str> {
        self.entries.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<D: Into<String>, I: Into<String>> FromIterator<(D, I)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (D, I)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(d, i)| (d.into(), i.into()))
                .collect(),
        }
    }
}

/// Turns a raw upstream record into a domain value.
///
/// Implementations must be thread-safe (Send + Sync). Bulk reads and
/// derived queries drop records for which this returns an error.
pub trait RecordMapper: Send + Sync {
    type Output: Send;

    fn map_record(&self, record: &ListItemRecord) -> Result<Self::Output, MappingError>;
}

/// Mapper that hands back the raw record unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRecords;

impl RecordMapper for RawRecords {
    type Output = ListItemRecord;

    fn map_record(&self, record: &ListItemRecord) -> Result<ListItemRecord, MappingError> {
        Ok(record.clone())
    }
}

/// Apply a mapper to every record, silently dropping the ones that fail.
pub fn map_records<M: RecordMapper>(
    mapper: &M,
    records: impl IntoIterator<Item = ListItemRecord>,
) -> Vec<M::Output> {
    records
        .into_iter()
        .filter_map(|record| mapper.map_record(&record).ok())
        .collect()
}
