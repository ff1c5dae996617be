//! Assetdesk Core - Record Types, Errors and Configuration
//!
//! Plain data shared by every other crate: upstream records, concurrency
//! tokens, the error taxonomy, the field-name table and the access-layer
//! configuration. No I/O lives here.

pub mod config;
pub mod credential;
pub mod error;
pub mod fields;
pub mod record;

pub use config::{AccessConfig, CacheSetConfig, CacheSettings};
pub use credential::BearerToken;
pub use error::{
    AssetdeskError, AssetdeskResult, ConfigError, CredentialError, MappingError, ResolutionError,
    TransportError, WriteError,
};
pub use fields::{map_records, FieldMap, RawRecords, RecordMapper};
pub use record::{
    value_matches, ConcurrencyToken, Fields, Identity, ItemRevision, ListItemRecord, PageCursor,
    Timestamp, TransitionedItem, WriteOutcome,
};
