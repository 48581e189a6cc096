//! Durable home of parked events.
//!
//! The engine keeps its own in-memory index of parked events and writes
//! through to an [`UnresolvedStore`] so they survive a restart.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{EventKey, InboundEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkedEvent {
    pub event: InboundEvent,
    pub reason: String,
    pub parked_at: DateTime<Utc>,
}

#[async_trait]
pub trait UnresolvedStore: Send + Sync {
    /// Insert or replace the entry for `parked.event.key()`.
    async fn park(&self, parked: &ParkedEvent) -> Result<()>;

    /// Returns `false` when nothing was stored under `key`.
    async fn remove(&self, key: &EventKey) -> Result<bool>;

    /// Every stored entry, oldest first.
    async fn load(&self) -> Result<Vec<ParkedEvent>>;
}

#[derive(Debug, Default)]
pub struct InMemoryUnresolved {
    entries: RwLock<BTreeMap<EventKey, ParkedEvent>>,
}

impl InMemoryUnresolved {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl UnresolvedStore for InMemoryUnresolved {
    async fn park(&self, parked: &ParkedEvent) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(parked.event.key(), parked.clone());
        Ok(())
    }

    async fn remove(&self, key: &EventKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn load(&self) -> Result<Vec<ParkedEvent>> {
        let mut all: Vec<ParkedEvent> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.parked_at);
        Ok(all)
    }
}
