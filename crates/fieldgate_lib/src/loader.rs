//! Tier-scoped batch loading of entities.
//!
//! Resolvers never fetch entities themselves. They return load requests,
//! which the [`BatchLoader`] collects while a tier resolves and then turns
//! into one [`EntityFetcher::fetch`] call per entity type.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_graphql::Value;
use async_trait::async_trait;
use fieldgate_common_types::EntityKey;
use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, debug_span, warn, Instrument};

use crate::context::{ExecutionContext, LoadFailure, LoadOutcome};
use crate::metrics;

/// A single entity a resolver is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadRequest {
    pub entity_type: String,
    pub key: EntityKey,
}

impl LoadRequest {
    pub fn new(entity_type: impl Into<String>, key: impl Into<EntityKey>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity_type, self.key)
    }
}

/// The data-fetch collaborator for one entity type.
///
/// Implementations receive a deduplicated key set and return the records
/// they found; keys missing from the result are reported as not found. An
/// `Err` marks the whole batch as unavailable. Retrying is up to the
/// implementation.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    async fn fetch(&self, keys: &[EntityKey]) -> anyhow::Result<HashMap<EntityKey, Value>>;
}

/// The fetchers of all entity types, shared by every query.
#[derive(Clone, Default)]
pub struct DataSources {
    fetchers: HashMap<String, Arc<dyn EntityFetcher>>,
}

impl fmt::Debug for DataSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSources")
            .field("entity_types", &self.fetchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        entity_type: impl Into<String>,
        fetcher: Arc<dyn EntityFetcher>,
    ) -> &mut Self {
        self.fetchers.insert(entity_type.into(), fetcher);
        self
    }

    pub fn with(mut self, entity_type: impl Into<String>, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.register(entity_type, fetcher);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<dyn EntityFetcher>> {
        self.fetchers.get(entity_type)
    }
}

/// Collects the load requests of one query and dispatches them in batches.
///
/// Deduplication happens against the [`ExecutionContext`], so a key that was
/// requested in an earlier tier is served from the context instead of being
/// fetched again.
pub struct BatchLoader<'a> {
    sources: &'a DataSources,
    context: &'a ExecutionContext,
    queue: Mutex<IndexMap<String, Vec<EntityKey>>>,
}

impl<'a> BatchLoader<'a> {
    pub fn new(sources: &'a DataSources, context: &'a ExecutionContext) -> Self {
        Self {
            sources,
            context,
            queue: Mutex::default(),
        }
    }

    /// Queues `request` for the next dispatch, unless the same entity is
    /// already pending or resolved in this query.
    pub fn enqueue(&self, request: &LoadRequest) {
        if self.context.reserve(request) {
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(request.entity_type.clone())
                .or_default()
                .push(request.key.clone());
        }
    }

    pub fn has_pending(&self) -> bool {
        !self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Fetches everything queued so far, one call per entity type, all
    /// entity types concurrently. Returns the number of batches issued.
    pub async fn dispatch(&self) -> usize {
        let batches = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let count = batches.len();
        join_all(
            batches
                .into_iter()
                .map(|(entity_type, keys)| {
                    let span = debug_span!("batch", %entity_type);
                    self.fetch_batch(entity_type, keys).instrument(span)
                }),
        )
        .await;
        count
    }

    pub fn outcome(&self, request: &LoadRequest) -> Option<LoadOutcome> {
        self.context.outcome(request)
    }

    async fn fetch_batch(&self, entity_type: String, keys: Vec<EntityKey>) {
        let Some(fetcher) = self.sources.get(&entity_type) else {
            warn!(%entity_type, "No data source registered for entity type");
            self.fail_batch(&entity_type, keys);
            return;
        };

        debug!(%entity_type, keys = keys.len(), "Dispatching batch");
        match fetcher.fetch(&keys).await {
            Ok(mut records) => {
                metrics()
                    .batch_fetches
                    .with_label_values(&[entity_type.as_str(), "true"])
                    .inc();
                for key in keys {
                    let outcome = records.remove(&key).ok_or(LoadFailure::NotFound);
                    self.context.complete(
                        LoadRequest {
                            entity_type: entity_type.clone(),
                            key,
                        },
                        outcome,
                    );
                }
            }
            Err(err) => {
                warn!(%entity_type, keys = keys.len(), error = %err, "Batch fetch failed");
                self.fail_batch(&entity_type, keys);
            }
        }
    }

    fn fail_batch(&self, entity_type: &str, keys: Vec<EntityKey>) {
        metrics()
            .batch_fetches
            .with_label_values(&[entity_type, "false"])
            .inc();
        for key in keys {
            self.context.complete(
                LoadRequest::new(entity_type, key),
                Err(LoadFailure::SourceUnavailable),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Skus {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EntityFetcher for Skus {
        async fn fetch(&self, keys: &[EntityKey]) -> anyhow::Result<HashMap<EntityKey, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "backend down");
            Ok(keys
                .iter()
                .filter(|key| key.as_str() != Some("missing"))
                .map(|key| (key.clone(), key.to_value()))
                .collect())
        }
    }

    #[tokio::test]
    async fn identical_keys_are_fetched_once() {
        let skus = Arc::new(Skus::default());
        let sources = DataSources::new().with("Product", skus.clone());
        let ctx = ExecutionContext::default();
        let loader = BatchLoader::new(&sources, &ctx);

        for _ in 0..3 {
            loader.enqueue(&LoadRequest::new("Product", "A"));
        }
        loader.enqueue(&LoadRequest::new("Product", "B"));
        assert_eq!(loader.dispatch().await, 1);
        assert_eq!(skus.calls.load(Ordering::SeqCst), 1);

        // Already resolved: nothing left to dispatch.
        loader.enqueue(&LoadRequest::new("Product", "A"));
        assert!(!loader.has_pending());
        assert_eq!(loader.dispatch().await, 0);
        assert_eq!(skus.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_keys_are_not_found_individually() {
        let sources = DataSources::new().with("Product", Arc::new(Skus::default()));
        let ctx = ExecutionContext::default();
        let loader = BatchLoader::new(&sources, &ctx);

        let found = LoadRequest::new("Product", "A");
        let missing = LoadRequest::new("Product", "missing");
        loader.enqueue(&found);
        loader.enqueue(&missing);
        loader.dispatch().await;

        assert_eq!(loader.outcome(&found), Some(Ok(Value::from("A"))));
        assert_eq!(loader.outcome(&missing), Some(Err(LoadFailure::NotFound)));
    }

    #[tokio::test]
    async fn failed_batches_mark_every_key_unavailable() {
        let skus = Skus {
            fail: true,
            ..Default::default()
        };
        let sources = DataSources::new().with("Product", Arc::new(skus));
        let ctx = ExecutionContext::default();
        let loader = BatchLoader::new(&sources, &ctx);

        let requests = [LoadRequest::new("Product", "A"), LoadRequest::new("Product", "B")];
        for request in &requests {
            loader.enqueue(request);
        }
        loader.dispatch().await;

        for request in &requests {
            assert_eq!(
                loader.outcome(request),
                Some(Err(LoadFailure::SourceUnavailable))
            );
        }
    }

    #[tokio::test]
    async fn unregistered_entity_types_are_unavailable() {
        let sources = DataSources::new();
        let ctx = ExecutionContext::default();
        let loader = BatchLoader::new(&sources, &ctx);

        let request = LoadRequest::new("Warehouse", 3);
        loader.enqueue(&request);
        loader.dispatch().await;
        assert_eq!(
            loader.outcome(&request),
            Some(Err(LoadFailure::SourceUnavailable))
        );
    }
}
