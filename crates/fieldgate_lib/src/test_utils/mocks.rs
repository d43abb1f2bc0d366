use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_graphql::Value;
use async_trait::async_trait;
use fieldgate_common_types::EntityKey;

use crate::loader::EntityFetcher;

/// An in-memory [`EntityFetcher`] that records every batch it receives.
#[derive(Debug, Default)]
pub struct MockFetcher {
    pub records: HashMap<EntityKey, Value>,
    pub fail: bool,
    pub delay: Option<Duration>,
    calls: Mutex<Vec<Vec<EntityKey>>>,
}

impl MockFetcher {
    pub fn new(records: impl IntoIterator<Item = (EntityKey, Value)>) -> Self {
        Self {
            records: records.into_iter().collect(),
            ..Default::default()
        }
    }

    /// A fetcher whose every batch fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The key sets of all batches received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<EntityKey>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl EntityFetcher for MockFetcher {
    async fn fetch(&self, keys: &[EntityKey]) -> anyhow::Result<HashMap<EntityKey, Value>> {
        self.calls.lock().unwrap().push(keys.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(anyhow!("boo"));
        }

        Ok(keys
            .iter()
            .filter_map(|key| Some((key.clone(), self.records.get(key)?.clone())))
            .collect())
    }
}
