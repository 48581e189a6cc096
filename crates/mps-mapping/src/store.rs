//! Mapping persistence contract.
//!
//! # Invariants
//! - One row per [`MappingKey`].
//! - `upsert` of a non-manual entry never replaces a stored manual entry;
//!   the store reports [`Upsert::KeptManual`] instead. Manual entries always
//!   replace whatever is stored.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use mps_schemas::{MappingEntry, MappingKey, MappingKind, MarketplaceId};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Written,
    KeptManual(MappingEntry),
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, key: &MappingKey) -> Result<Option<MappingEntry>>;

    async fn upsert(&self, entry: MappingEntry) -> Result<Upsert>;

    /// Returns whether a row was deleted.
    async fn remove(&self, key: &MappingKey) -> Result<bool>;

    /// Entries matching the optional filters, ordered by key.
    async fn list(
        &self,
        marketplace: Option<MarketplaceId>,
        kind: Option<MappingKind>,
    ) -> Result<Vec<MappingEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    entries: RwLock<BTreeMap<MappingKey, MappingEntry>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn get(&self, key: &MappingKey) -> Result<Option<MappingEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn upsert(&self, entry: MappingEntry) -> Result<Upsert> {
        let mut entries = self.entries.write().await;
        let key = entry.key();
        if let Some(existing) = entries.get(&key) {
            if existing.is_manual() && !entry.is_manual() {
                return Ok(Upsert::KeptManual(existing.clone()));
            }
        }
        entries.insert(key, entry);
        Ok(Upsert::Written)
    }

    async fn remove(&self, key: &MappingKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(
        &self,
        marketplace: Option<MarketplaceId>,
        kind: Option<MappingKind>,
    ) -> Result<Vec<MappingEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| marketplace.map_or(true, |m| e.marketplace == m))
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mps_schemas::MappingMethod;

    fn key(local: &str) -> MappingKey {
        MappingKey::new(local, MarketplaceId::N11, MappingKind::Brand)
    }

    #[tokio::test]
    async fn auto_never_replaces_manual() {
        let store = InMemoryMappingStore::new();
        let manual = MappingEntry::manual(key("b1"), "77", "Nike", Utc::now());
        assert_eq!(store.upsert(manual.clone()).await.unwrap(), Upsert::Written);

        let auto = MappingEntry::scored(key("b1"), "78", "Nike Inc", MappingMethod::Auto, 0.9, Utc::now());
        assert_eq!(
            store.upsert(auto).await.unwrap(),
            Upsert::KeptManual(manual.clone())
        );
        assert_eq!(store.get(&key("b1")).await.unwrap(), Some(manual));
    }

    #[tokio::test]
    async fn manual_replaces_auto() {
        let store = InMemoryMappingStore::new();
        let auto = MappingEntry::scored(key("b2"), "1", "A", MappingMethod::Auto, 0.8, Utc::now());
        store.upsert(auto).await.unwrap();
        let manual = MappingEntry::manual(key("b2"), "2", "B", Utc::now());
        store.upsert(manual).await.unwrap();
        assert_eq!(store.get(&key("b2")).await.unwrap().unwrap().remote_id, "2");
    }

    #[tokio::test]
    async fn list_filters() {
        let store = InMemoryMappingStore::new();
        store
            .upsert(MappingEntry::manual(key("x"), "1", "X", Utc::now()))
            .await
            .unwrap();
        store
            .upsert(MappingEntry::manual(
                MappingKey::new("y", MarketplaceId::Amazon, MappingKind::Category),
                "2",
                "Y",
                Utc::now(),
            ))
            .await
            .unwrap();
        assert_eq!(store.list(None, None).await.unwrap().len(), 2);
        assert_eq!(store.list(Some(MarketplaceId::N11), None).await.unwrap().len(), 1);
        assert_eq!(
            store
                .list(Some(MarketplaceId::N11), Some(MappingKind::Category))
                .await
                .unwrap()
                .len(),
            0
        );
        assert!(store.remove(&key("x")).await.unwrap());
        assert!(!store.remove(&key("x")).await.unwrap());
    }
}
