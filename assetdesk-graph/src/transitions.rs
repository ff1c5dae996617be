//! Point-in-time state queries: which items entered a state on or after a
//! cutoff.
//!
//! Two phases. The candidate phase pages through items currently in the
//! target state, newest-modified first, and stops once a page reaches past
//! the cutoff. The confirmation phase scans each candidate's revision
//! history for the instant it most recently entered the state, in batches
//! of at most `concurrency` items so no more than that many history reads
//! are ever outstanding.
//!
//! Items whose history cannot be read are dropped from the result rather
//! than failing the query.

use std::sync::Arc;

use assetdesk_cache::{CacheSet, TransitionAtKey, TransitionsKey, TransitionsSnapshot};
use assetdesk_core::{
    AccessConfig, AssetdeskResult, BearerToken, ItemRevision, ListItemRecord, RecordMapper,
    Timestamp, TransitionedItem,
};
use futures_util::future::join_all;

use crate::metrics::CallContext;
use crate::odata::{self, ItemQuery};
use crate::paging::{PageControl, PageWalker};
use crate::resolver::ResolvedList;

/// Upstream column holding an item's last-modified instant.
const MODIFIED_FIELD: &str = "Modified";

/// "Which items entered `state` (in column `state_field`) on or after `cutoff`?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateQuery {
    /// Upstream internal column name.
    pub state_field: String,
    pub state: String,
    pub cutoff: Timestamp,
}

impl StateQuery {
    pub fn new(state_field: impl Into<String>, state: impl Into<String>, cutoff: Timestamp) -> Self {
        Self {
            state_field: state_field.into(),
            state: state.into(),
            cutoff,
        }
    }
}

/// Page sizes, batch width and result cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionSettings {
    pub page_size: u32,
    pub versions_page_size: u32,
    pub concurrency: usize,
    pub max_results: usize,
}

impl TransitionSettings {
    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            page_size: config.transitions_page_size,
            versions_page_size: config.versions_page_size,
            concurrency: config.deployed_concurrency,
            max_results: config.transitions_max_results,
        }
    }
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self::from_config(&AccessConfig::default())
    }
}

// ============================================================================
// REVISION SCAN
// ============================================================================

/// Incremental scan of a newest-first revision history.
///
/// Looks for the first adjacent pair where the newer revision is in the
/// target state and the older one is not; the newer revision's timestamp
/// is the transition instant. With no such pair, an oldest revision that
/// is already in the state yields its own timestamp.
#[derive(Debug)]
pub struct TransitionScan<'a> {
    field: &'a str,
    state: &'a str,
    newer: Option<(bool, Timestamp)>,
    found: Option<Timestamp>,
}

impl<'a> TransitionScan<'a> {
    pub fn new(field: &'a str, state: &'a str) -> Self {
        Self {
            field,
            state,
            newer: None,
            found: None,
        }
    }

    /// Feed the next (older) slice of history. Returns `true` once the
    /// transition has been found and no more history is needed.
    pub fn feed<'r>(&mut self, revisions: impl IntoIterator<Item = &'r ItemRevision>) -> bool {
        if self.found.is_some() {
            return true;
        }
        for revision in revisions {
            let in_state = revision.field_equals(self.field, self.state);
            if let Some((newer_in_state, newer_at)) = self.newer {
                if newer_in_state && !in_state {
                    self.found = Some(newer_at);
                    return true;
                }
            }
            self.newer = Some((in_state, revision.modified_at));
        }
        false
    }

    /// Transition instant, if any, given everything fed so far.
    pub fn finish(self) -> Option<Timestamp> {
        self.found.or(match self.newer {
            Some((true, oldest_at)) => Some(oldest_at),
            _ => None,
        })
    }
}

/// Transition instant over a complete newest-first history.
pub fn transition_instant(revisions: &[ItemRevision], field: &str, state: &str) -> Option<Timestamp> {
    let mut scan = TransitionScan::new(field, state);
    scan.feed(revisions);
    scan.finish()
}

/// Newest first by last-modified, falling back to created.
pub fn sort_newest_first<T>(items: &mut [TransitionedItem<T>], key: impl Fn(&T) -> Option<Timestamp>) {
    items.sort_by(|a, b| key(&b.item).cmp(&key(&a.item)));
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Runs point-in-time queries against one upstream.
#[derive(Debug, Clone)]
pub struct TransitionResolver {
    walker: PageWalker,
    caches: Arc<CacheSet>,
    settings: TransitionSettings,
    fields: Vec<String>,
}

impl TransitionResolver {
    pub fn new(walker: PageWalker, caches: Arc<CacheSet>, settings: TransitionSettings) -> Self {
        Self {
            walker,
            caches,
            settings,
            fields: Vec::new(),
        }
    }

    /// Restrict the columns fetched for candidates. The state column is
    /// always added.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Items that entered `query.state` on or after `query.cutoff`, newest
    /// first, at most `max_results` of them.
    ///
    /// # Errors
    /// Only candidate-phase failures propagate; confirmation failures drop
    /// the affected item.
    pub async fn transitioned_since(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        query: &StateQuery,
    ) -> AssetdeskResult<TransitionsSnapshot> {
        let key = TransitionsKey {
            list_id: list.list_id.clone(),
            state_field: query.state_field.clone(),
            state: query.state.clone(),
            cutoff: query.cutoff,
        };
        if let Some(cached) = self.caches.transitions().get(&key) {
            tracing::debug!(
                operation = ctx.operation(),
                state = %query.state,
                results = cached.len(),
                "Transitions served from cache"
            );
            return Ok(cached);
        }

        let candidates = self.candidates(ctx, credential, list, query).await?;
        let candidate_count = candidates.len();
        let confirmed = self
            .confirm(ctx, credential, list, query, candidates, |record| {
                Some(record.clone())
            })
            .await;
        log_resolved(ctx, query, candidate_count, confirmed.len());

        let snapshot = Arc::new(confirmed);
        self.caches.transitions().set(key, snapshot.clone());
        Ok(snapshot)
    }

    /// [`Self::transitioned_since`] through `mapper`. Records the mapper
    /// rejects are excluded before the result cap applies, so they never
    /// take the place of a mappable item.
    ///
    /// Per-item transition instants are cached; the mapped result set is
    /// not.
    pub async fn transitioned_since_mapped<M: RecordMapper>(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        query: &StateQuery,
        mapper: &M,
    ) -> AssetdeskResult<Vec<TransitionedItem<M::Output>>> {
        let candidates = self.candidates(ctx, credential, list, query).await?;
        let candidate_count = candidates.len();
        let confirmed = self
            .confirm(ctx, credential, list, query, candidates, |record| {
                match mapper.map_record(record) {
                    Ok(item) => Some(item),
                    Err(err) => {
                        tracing::debug!(
                            item_id = record.id(),
                            error = %err,
                            "Dropping record that failed mapping"
                        );
                        None
                    }
                }
            })
            .await;
        log_resolved(ctx, query, candidate_count, confirmed.len());
        Ok(confirmed)
    }

    /// Items currently in the target state and modified on/after the
    /// cutoff.
    ///
    /// Paging relies on the upstream honouring the Modified-descending
    /// order; every entry is still re-checked here so an out-of-order page
    /// can only cost recall, never admit a wrong item.
    pub async fn candidates(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        query: &StateQuery,
    ) -> AssetdeskResult<Vec<ListItemRecord>> {
        let item_query = ItemQuery::new()
            .top(self.settings.page_size)
            .fields(self.candidate_fields(query))
            .filter(format!(
                "fields/{} eq {}",
                query.state_field,
                odata::string_literal(&query.state)
            ))
            .order_by(format!("fields/{} desc", MODIFIED_FIELD));

        let cutoff = query.cutoff;
        let mut candidates = Vec::new();
        self.walker
            .for_each_page(
                ctx,
                item_query.build(&list.items_url),
                credential,
                item_query.headers(),
                |page: Vec<ListItemRecord>| {
                    let oldest = page.iter().filter_map(ListItemRecord::last_modified_at).min();
                    candidates.extend(page.into_iter().filter(|record| {
                        record.field_equals(&query.state_field, &query.state)
                            && record.last_modified_at().is_some_and(|at| at >= cutoff)
                    }));
                    match oldest {
                        Some(oldest) if oldest < cutoff => PageControl::Stop,
                        _ => PageControl::Continue,
                    }
                },
            )
            .await?;
        Ok(candidates)
    }

    /// Transition instant for one item, cached per item version.
    pub async fn transition_at(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        query: &StateQuery,
        record: &ListItemRecord,
    ) -> AssetdeskResult<Option<Timestamp>> {
        let key = TransitionAtKey {
            list_id: list.list_id.clone(),
            item_id: record.id().to_string(),
            state_field: query.state_field.clone(),
            state: query.state.clone(),
            version: record.last_modified_at(),
        };
        if let Some(cached) = self.caches.transition_at().get(&key) {
            return Ok(cached);
        }

        let url = odata::versions_url(
            &list.items_url,
            record.id(),
            self.settings.versions_page_size,
            std::slice::from_ref(&query.state_field),
        );
        let mut scan = TransitionScan::new(&query.state_field, &query.state);
        self.walker
            .for_each_page(ctx, url, credential, &[], |page: Vec<ItemRevision>| {
                if scan.feed(&page) {
                    PageControl::Stop
                } else {
                    PageControl::Continue
                }
            })
            .await?;

        let instant = scan.finish();
        self.caches.transition_at().set(key, instant);
        Ok(instant)
    }

    /// Scan candidate histories in bounded batches. `accept` turns a
    /// confirmed record into a result; only accepted records count toward
    /// `max_results`.
    async fn confirm<T, F>(
        &self,
        ctx: &CallContext,
        credential: &BearerToken,
        list: &ResolvedList,
        query: &StateQuery,
        candidates: Vec<ListItemRecord>,
        accept: F,
    ) -> Vec<TransitionedItem<T>>
    where
        F: Fn(&ListItemRecord) -> Option<T>,
    {
        let history_ctx = ctx.child("item_versions");
        // Results keyed by their record's sort timestamp.
        let mut confirmed: Vec<TransitionedItem<(Option<Timestamp>, T)>> = Vec::new();

        for batch in candidates.chunks(self.settings.concurrency.max(1)) {
            if confirmed.len() >= self.settings.max_results {
                break;
            }
            let instants = join_all(
                batch
                    .iter()
                    .map(|record| self.transition_at(&history_ctx, credential, list, query, record)),
            )
            .await;

            for (record, instant) in batch.iter().zip(instants) {
                match instant {
                    Ok(Some(at)) if at >= query.cutoff => {
                        if let Some(item) = accept(record) {
                            confirmed.push(TransitionedItem {
                                item: (record.sort_timestamp(), item),
                                transitioned_at: at,
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(err) => tracing::debug!(
                        item_id = record.id(),
                        error = %err,
                        "Dropping item whose revision history could not be read"
                    ),
                }
            }
        }

        sort_newest_first(&mut confirmed, |(sort_at, _)| *sort_at);
        confirmed
            .into_iter()
            .take(self.settings.max_results)
            .map(|entry| entry.map(|(_, item)| item))
            .collect()
    }

    fn candidate_fields(&self, query: &StateQuery) -> Vec<String> {
        if self.fields.is_empty() {
            return Vec::new();
        }
        let mut fields = self.fields.clone();
        for required in [query.state_field.as_str(), MODIFIED_FIELD] {
            if !fields.iter().any(|f| f == required) {
                fields.push(required.to_string());
            }
        }
        fields
    }
}

fn log_resolved(ctx: &CallContext, query: &StateQuery, candidates: usize, confirmed: usize) {
    tracing::info!(
        operation = ctx.operation(),
        correlation_id = %ctx.correlation_id(),
        state = %query.state,
        cutoff = %query.cutoff,
        candidates,
        confirmed,
        "Resolved state transitions"
    );
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
