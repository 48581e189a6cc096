//! Processed-event ledger: the durable half of event idempotency.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::EventKey;
use tokio::sync::RwLock;

#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn is_processed(&self, key: &EventKey) -> Result<bool>;

    /// Returns `false` when the key was already recorded.
    async fn mark_processed(&self, key: &EventKey, at: DateTime<Utc>) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    processed: RwLock<HashMap<EventKey, DateTime<Utc>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.processed.read().await.len()
    }

    pub async fn processed_at(&self, key: &EventKey) -> Option<DateTime<Utc>> {
        self.processed.read().await.get(key).copied()
    }
}

#[async_trait]
impl EventLedger for InMemoryLedger {
    async fn is_processed(&self, key: &EventKey) -> Result<bool> {
        Ok(self.processed.read().await.contains_key(key))
    }

    async fn mark_processed(&self, key: &EventKey, at: DateTime<Utc>) -> Result<bool> {
        let mut map = self.processed.write().await;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.clone(), at);
        Ok(true)
    }
}
