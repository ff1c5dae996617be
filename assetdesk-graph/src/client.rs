//! Caller-facing facade over one upstream.
//!
//! [`AssetListClient`] wires the resolver, page walker, transition
//! resolver and write coordinator together around a shared
//! [`CacheSet`]. Callers speak in domain field names; the [`FieldMap`]
//! translates them to upstream internal names on the way out.

use std::collections::BTreeSet;
use std::sync::Arc;

use assetdesk_cache::{CacheSet, ItemSnapshot, TransitionsSnapshot};
use assetdesk_core::{
    map_records, AccessConfig, AssetdeskResult, BearerToken, ConcurrencyToken, FieldMap, Fields,
    ItemRevision, ListItemRecord, RecordMapper, Timestamp, TransitionedItem, WriteOutcome,
};
use serde_json::Value;

use crate::executor::Executor;
use crate::metrics::CallContext;
use crate::odata::{self, ItemQuery};
use crate::paging::PageWalker;
use crate::resolver::{IdentifierResolver, ListLocation, ResolvedList};
use crate::transitions::{StateQuery, TransitionResolver, TransitionSettings};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::writes::WriteCoordinator;

/// Read/write access to list-backed asset records.
#[derive(Debug, Clone)]
pub struct AssetListClient {
    config: AccessConfig,
    caches: Arc<CacheSet>,
    fields: FieldMap,
    resolver: IdentifierResolver,
    walker: PageWalker,
    transitions: TransitionResolver,
    writes: WriteCoordinator,
}

impl AssetListClient {
    /// Build a client over `transport`.
    ///
    /// # Errors
    /// Returns a config error if `config` fails validation.
    pub fn new(
        config: AccessConfig,
        transport: Arc<dyn HttpTransport>,
        caches: Arc<CacheSet>,
        fields: FieldMap,
    ) -> AssetdeskResult<Self> {
        config.validate()?;

        let executor = Executor::new(transport, config.max_retries);
        let walker = PageWalker::new(executor.clone());
        let selected: Vec<String> = fields.internal_names().into_iter().map(String::from).collect();

        Ok(Self {
            resolver: IdentifierResolver::new(
                executor.clone(),
                caches.clone(),
                config.graph_base_url.clone(),
            ),
            transitions: TransitionResolver::new(
                walker.clone(),
                caches.clone(),
                TransitionSettings::from_config(&config),
            )
            .with_fields(selected),
            writes: WriteCoordinator::new(executor),
            walker,
            caches,
            fields,
            config,
        })
    }

    /// Build a client over the production `reqwest` transport with a fresh
    /// cache set sized from `config`.
    pub fn with_reqwest(config: AccessConfig, fields: FieldMap) -> AssetdeskResult<Self> {
        let caches = Arc::new(CacheSet::new(&config.caches));
        Self::new(config, Arc::new(ReqwestTransport::new()), caches, fields)
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheSet> {
        &self.caches
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Upstream identifiers for `location`.
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
    ) -> AssetdeskResult<ResolvedList> {
        self.resolver.resolve(ctx, credential, location).await
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Every item in the list, in upstream order.
    pub async fn list_items(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
    ) -> AssetdeskResult<ItemSnapshot> {
        let list = self.resolve(ctx, credential, location).await?;
        if let Some(snapshot) = self.caches.items().get(&list.list_id) {
            return Ok(snapshot);
        }

        let query = ItemQuery::new()
            .top(self.config.bulk_page_size)
            .fields(self.selected_fields());
        let records: Vec<ListItemRecord> = self
            .walker
            .fetch_all(ctx, query.build(&list.items_url), credential, query.headers())
            .await?;
        tracing::debug!(
            operation = ctx.operation(),
            list_id = %list.list_id,
            items = records.len(),
            "Fetched item collection"
        );

        let snapshot = Arc::new(records);
        self.caches.items().set(list.list_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Every item that `mapper` accepts; rejected records are dropped.
    pub async fn list_items_mapped<M: RecordMapper>(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        mapper: &M,
    ) -> AssetdeskResult<Vec<M::Output>> {
        let snapshot = self.list_items(ctx, credential, location).await?;
        let mapped = map_records(mapper, snapshot.iter().cloned());
        if mapped.len() < snapshot.len() {
            tracing::debug!(
                operation = ctx.operation(),
                dropped = snapshot.len() - mapped.len(),
                "Dropped records that failed mapping"
            );
        }
        Ok(mapped)
    }

    /// First item whose `field` (domain name) equals `value`.
    pub async fn find_item_by_field(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        field: &str,
        value: &str,
    ) -> AssetdeskResult<Option<ListItemRecord>> {
        let list = self.resolve(ctx, credential, location).await?;
        let internal = self.fields.internal(field);
        let query = ItemQuery::new()
            .top(1)
            .fields(self.selected_fields())
            .filter(format!("fields/{} eq {}", internal, odata::string_literal(value)));

        let page = self
            .walker
            .fetch_page::<ListItemRecord>(
                ctx,
                &query.build(&list.items_url),
                credential,
                query.headers(),
            )
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Full revision history of one item, newest first.
    pub async fn item_versions(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        item_id: &str,
    ) -> AssetdeskResult<Vec<ItemRevision>> {
        let list = self.resolve(ctx, credential, location).await?;
        let url = odata::versions_url(
            &list.items_url,
            item_id,
            self.config.versions_page_size,
            &self.selected_fields(),
        );
        self.walker.fetch_all(ctx, url, credential, &[]).await
    }

    /// Items that entered `state` in `state_field` (domain name) on or
    /// after `cutoff`.
    pub async fn transitioned_since(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        state_field: &str,
        state: &str,
        cutoff: Timestamp,
    ) -> AssetdeskResult<TransitionsSnapshot> {
        let list = self.resolve(ctx, credential, location).await?;
        let query = StateQuery::new(self.fields.internal(state_field), state, cutoff);
        self.transitions
            .transitioned_since(ctx, credential, &list, &query)
            .await
    }

    /// [`Self::transitioned_since`] through a mapper. Rejected records are
    /// dropped and do not count toward the result cap.
    #[allow(clippy::too_many_arguments)]
    pub async fn transitioned_since_mapped<M: RecordMapper>(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        state_field: &str,
        state: &str,
        cutoff: Timestamp,
        mapper: &M,
    ) -> AssetdeskResult<Vec<TransitionedItem<M::Output>>> {
        let list = self.resolve(ctx, credential, location).await?;
        let query = StateQuery::new(self.fields.internal(state_field), state, cutoff);
        self.transitions
            .transitioned_since_mapped(ctx, credential, &list, &query, mapper)
            .await
    }

    /// Sorted distinct values of `field` (domain name) across the list.
    pub async fn distinct_field_values(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        field: &str,
    ) -> AssetdeskResult<Vec<String>> {
        let snapshot = self.list_items(ctx, credential, location).await?;
        let internal = self.fields.internal(field);
        let values: BTreeSet<String> = snapshot
            .iter()
            .filter_map(|record| record.field(internal).and_then(facet_value))
            .collect();
        Ok(values.into_iter().collect())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Patch an item. `patch` uses domain field names.
    pub async fn update_item(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        item_id: &str,
        patch: &Fields,
        token: Option<&ConcurrencyToken>,
    ) -> AssetdeskResult<WriteOutcome> {
        let list = self.resolve(ctx, credential, location).await?;
        let outcome = self
            .writes
            .update(ctx, credential, &list, item_id, &self.translate(patch), token)
            .await?;
        self.caches.invalidate_after_write();
        Ok(outcome)
    }

    /// Create an item. `fields` uses domain field names.
    pub async fn create_item(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        fields: &Fields,
    ) -> AssetdeskResult<WriteOutcome> {
        let list = self.resolve(ctx, credential, location).await?;
        let outcome = self
            .writes
            .create(ctx, credential, &list, &self.translate(fields))
            .await?;
        self.caches.invalidate_after_write();
        Ok(outcome)
    }

    pub async fn delete_item(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        location: &ListLocation,
        item_id: &str,
        token: Option<&ConcurrencyToken>,
    ) -> AssetdeskResult<()> {
        let list = self.resolve(ctx, credential, location).await?;
        self.writes
            .delete(ctx, credential, &list, item_id, token)
            .await?;
        self.caches.invalidate_after_write();
        Ok(())
    }

    /// Drop item snapshots and derived results, e.g. after a write made
    /// elsewhere changed a faceted field.
    pub fn invalidate_facets(&self) {
        self.caches.invalidate_after_write();
    }

    fn selected_fields(&self) -> Vec<String> {
        self.fields
            .internal_names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn translate(&self, fields: &Fields) -> Fields {
        fields
            .iter()
            .map(|(name, value)| (self.fields.internal(name).to_string(), value.clone()))
            .collect()
    }
}

fn facet_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;
    use serde_json::json;

    fn client(config: AccessConfig) -> AssetdeskResult<AssetListClient> {
        AssetListClient::new(
            config,
            Arc::new(ScriptedTransport::new()),
            Arc::new(CacheSet::default()),
            FieldMap::new().with("status", "Status").with("assetTag", "AssetTag"),
        )
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AccessConfig {
            deployed_concurrency: 0,
            ..Default::default()
        };
        assert!(client(config).is_err());
    }

    #[test]
    fn test_translate_uses_field_map() {
        let client = client(AccessConfig::default()).unwrap();
        let mut patch = Fields::new();
        patch.insert("status".to_string(), json!("Retired"));
        patch.insert("Notes".to_string(), json!("as-is"));

        let translated = client.translate(&patch);
        assert_eq!(translated.get("Status"), Some(&json!("Retired")));
        assert_eq!(translated.get("Notes"), Some(&json!("as-is")));
        assert!(translated.get("status").is_none());
    }

    #[test]
    fn test_facet_value() {
        assert_eq!(facet_value(&json!("Laptop")), Some("Laptop".to_string()));
        assert_eq!(facet_value(&json!(3)), Some("3".to_string()));
        assert_eq!(facet_value(&json!("")), None);
        assert_eq!(facet_value(&json!(null)), None);
    }
}
