//! Maps local taxonomy entities (categories, brands, attributes) onto a
//! marketplace's own taxonomy.
//!
//! # Contract
//! - Manual mappings win. Auto and assisted runs report
//!   [`MapOutcome::AlreadyManual`] and leave the manual entry untouched.
//! - A best candidate below `min_confidence` is reported as
//!   [`MapOutcome::SkippedLowConfidence`] and is never persisted.
//! - Re-running auto-mapping may move an auto/assisted entry to a new remote
//!   or confidence.
//! - Among equally scored candidates the smallest remote id wins, so runs are
//!   deterministic.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mps_config::MappingSettings;
use mps_schemas::{
    MappingEntry, MappingKey, MappingKind, MappingMethod, MarketplaceId, SyncError,
};
use serde::{Deserialize, Serialize};

use crate::similarity;
use crate::store::{MappingStore, Upsert};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One entry of a marketplace's entity catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: String,
    pub name: String,
}

impl RemoteEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A local entity awaiting a mapping on one marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub local_id: String,
    pub local_name: String,
    pub kind: MappingKind,
    pub marketplace: MarketplaceId,
}

impl MappingCandidate {
    pub fn key(&self) -> MappingKey {
        MappingKey::new(self.local_id.clone(), self.marketplace, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Mapped(MappingEntry),
    SkippedLowConfidence { best_score: f64 },
    AlreadyManual(MappingEntry),
    NoCandidates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub mapped: u32,
    pub skipped_low_confidence: u32,
    pub already_manual: u32,
    pub no_candidates: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub remote_id: String,
    pub remote_name: String,
    pub score: f64,
}

/// External confidence source for assisted mapping (e.g. a model).
#[async_trait]
pub trait AssistedScorer: Send + Sync {
    /// Confidence in `[0, 1]` that `remote` is the counterpart of `candidate`.
    async fn score(
        &self,
        candidate: &MappingCandidate,
        remote: &RemoteEntity,
    ) -> Result<f64, SyncError>;
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct MappingResolver {
    store: Arc<dyn MappingStore>,
    min_confidence: f64,
}

fn store_error(key: &MappingKey, e: anyhow::Error) -> SyncError {
    SyncError::internal(format!("mapping store: {e:#}"))
        .with_marketplace(key.marketplace)
        .with_entity(key.local_id.clone())
}

/// Higher score first, then smaller remote id.
fn rank(a: &Suggestion, b: &Suggestion) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.remote_id.cmp(&b.remote_id))
}

impl MappingResolver {
    pub fn new(store: Arc<dyn MappingStore>, min_confidence: f64) -> Self {
        Self {
            store,
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(store: Arc<dyn MappingStore>, settings: &MappingSettings) -> Self {
        Self::new(store, settings.min_confidence)
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Upsert an operator mapping (confidence 1.0).
    pub async fn set_manual(
        &self,
        local_id: &str,
        kind: MappingKind,
        marketplace: MarketplaceId,
        remote: &RemoteEntity,
    ) -> Result<MappingEntry, SyncError> {
        let key = MappingKey::new(local_id, marketplace, kind);
        let entry = MappingEntry::manual(key.clone(), remote.id.clone(), remote.name.clone(), Utc::now());
        self.store
            .upsert(entry.clone())
            .await
            .map_err(|e| store_error(&key, e))?;
        tracing::info!(mapping = %key, remote_id = %remote.id, "manual mapping set");
        Ok(entry)
    }

    /// Delete a mapping of any method. Returns whether one existed.
    pub async fn remove(
        &self,
        local_id: &str,
        kind: MappingKind,
        marketplace: MarketplaceId,
    ) -> Result<bool, SyncError> {
        let key = MappingKey::new(local_id, marketplace, kind);
        let removed = self.store.remove(&key).await.map_err(|e| store_error(&key, e))?;
        if removed {
            tracing::info!(mapping = %key, "mapping removed");
        }
        Ok(removed)
    }

    pub async fn resolve(
        &self,
        local_id: &str,
        kind: MappingKind,
        marketplace: MarketplaceId,
    ) -> Result<MappingEntry, SyncError> {
        let key = MappingKey::new(local_id, marketplace, kind);
        self.store
            .get(&key)
            .await
            .map_err(|e| store_error(&key, e))?
            .ok_or_else(|| SyncError::mapping_not_found(local_id).with_marketplace(marketplace))
    }

    /// Top `n` catalog entries by similarity to the candidate's name.
    pub fn suggestions(
        &self,
        candidate: &MappingCandidate,
        remote_catalog: &[RemoteEntity],
        n: usize,
    ) -> Vec<Suggestion> {
        let mut scored: Vec<Suggestion> = remote_catalog
            .iter()
            .map(|r| Suggestion {
                remote_id: r.id.clone(),
                remote_name: r.name.clone(),
                score: similarity::score(&candidate.local_name, &r.name),
            })
            .collect();
        scored.sort_by(rank);
        scored.truncate(n);
        scored
    }

    pub async fn auto_map(
        &self,
        candidate: &MappingCandidate,
        remote_catalog: &[RemoteEntity],
    ) -> Result<MapOutcome, SyncError> {
        if let Some(manual) = self.existing_manual(candidate).await? {
            return Ok(MapOutcome::AlreadyManual(manual));
        }
        let best = self.suggestions(candidate, remote_catalog, 1).into_iter().next();
        self.commit(candidate, best, MappingMethod::Auto).await
    }

    pub async fn assisted_map(
        &self,
        candidate: &MappingCandidate,
        remote_catalog: &[RemoteEntity],
        scorer: &dyn AssistedScorer,
    ) -> Result<MapOutcome, SyncError> {
        if let Some(manual) = self.existing_manual(candidate).await? {
            return Ok(MapOutcome::AlreadyManual(manual));
        }
        let mut scored = Vec::with_capacity(remote_catalog.len());
        for remote in remote_catalog {
            let s = scorer.score(candidate, remote).await.map_err(|e| {
                e.with_marketplace(candidate.marketplace)
                    .with_entity(candidate.local_id.clone())
            })?;
            scored.push(Suggestion {
                remote_id: remote.id.clone(),
                remote_name: remote.name.clone(),
                score: if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) },
            });
        }
        scored.sort_by(rank);
        self.commit(candidate, scored.into_iter().next(), MappingMethod::Assisted)
            .await
    }

    /// Auto-map every candidate. A failing candidate is counted and logged;
    /// the run continues.
    pub async fn bulk_auto_map(
        &self,
        candidates: &[MappingCandidate],
        remote_catalog: &[RemoteEntity],
    ) -> BulkReport {
        let mut report = BulkReport::default();
        for c in candidates {
            match self.auto_map(c, remote_catalog).await {
                Ok(MapOutcome::Mapped(_)) => report.mapped += 1,
                Ok(MapOutcome::SkippedLowConfidence { .. }) => report.skipped_low_confidence += 1,
                Ok(MapOutcome::AlreadyManual(_)) => report.already_manual += 1,
                Ok(MapOutcome::NoCandidates) => report.no_candidates += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        marketplace = %c.marketplace,
                        local_id = %c.local_id,
                        error = %e,
                        "auto-map failed for candidate"
                    );
                }
            }
        }
        tracing::info!(
            mapped = report.mapped,
            skipped = report.skipped_low_confidence,
            manual = report.already_manual,
            failed = report.failed,
            "bulk auto-map finished"
        );
        report
    }

    // -- internals ----------------------------------------------------------

    async fn existing_manual(
        &self,
        candidate: &MappingCandidate,
    ) -> Result<Option<MappingEntry>, SyncError> {
        let key = candidate.key();
        let existing = self.store.get(&key).await.map_err(|e| store_error(&key, e))?;
        Ok(existing.filter(|e| e.is_manual()))
    }

    async fn commit(
        &self,
        candidate: &MappingCandidate,
        best: Option<Suggestion>,
        method: MappingMethod,
    ) -> Result<MapOutcome, SyncError> {
        let Some(best) = best else {
            return Ok(MapOutcome::NoCandidates);
        };
        let key = candidate.key();
        if best.score < self.min_confidence {
            tracing::debug!(
                mapping = %key,
                best = best.score,
                threshold = self.min_confidence,
                "best candidate below threshold, not mapped"
            );
            return Ok(MapOutcome::SkippedLowConfidence {
                best_score: best.score,
            });
        }
        let entry = MappingEntry::scored(
            key.clone(),
            best.remote_id,
            best.remote_name,
            method,
            best.score,
            Utc::now(),
        );
        match self
            .store
            .upsert(entry.clone())
            .await
            .map_err(|e| store_error(&key, e))?
        {
            Upsert::Written => {
                tracing::info!(
                    mapping = %key,
                    remote_id = %entry.remote_id,
                    confidence = entry.confidence,
                    method = %entry.method.as_str(),
                    "mapping stored"
                );
                Ok(MapOutcome::Mapped(entry))
            }
            // A manual entry landed between the check and the write.
            Upsert::KeptManual(manual) => Ok(MapOutcome::AlreadyManual(manual)),
        }
    }
}
