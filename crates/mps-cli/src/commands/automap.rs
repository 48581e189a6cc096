//! Offline auto-map: score local names against a marketplace catalog read
//! from CSV. Dry run against an in-memory store unless `--apply` is given,
//! in which case entries land in `mapping_entries` and manual rows stay put.

use std::sync::Arc;

use anyhow::{Context, Result};
use mps_mapping::{
    BulkReport, InMemoryMappingStore, MapOutcome, MappingCandidate, MappingResolver, MappingStore,
    RemoteEntity,
};
use mps_schemas::{MappingKind, MarketplaceId};
use serde::Deserialize;

/// `local_id,name`
#[derive(Debug, Deserialize)]
struct LocalRow {
    local_id: String,
    name: String,
}

/// `id,name`
#[derive(Debug, Deserialize)]
struct RemoteRow {
    id: String,
    name: String,
}

pub struct AutomapArgs {
    pub marketplace: String,
    pub kind: String,
    pub local_csv: String,
    pub remote_csv: String,
    pub min_confidence: f64,
    pub apply: bool,
}

pub async fn run(args: AutomapArgs) -> Result<BulkReport> {
    let marketplace = MarketplaceId::parse(&args.marketplace).map_err(|e| anyhow::anyhow!("{e}"))?;
    let kind = MappingKind::parse(&args.kind).with_context(|| {
        format!(
            "invalid --kind '{}'. expected one of: category | brand | attribute",
            args.kind
        )
    })?;

    let candidates: Vec<MappingCandidate> = read_csv::<LocalRow>(&args.local_csv)?
        .into_iter()
        .map(|r| MappingCandidate {
            local_id: r.local_id,
            local_name: r.name,
            kind,
            marketplace,
        })
        .collect();
    let remote: Vec<RemoteEntity> = read_csv::<RemoteRow>(&args.remote_csv)?
        .into_iter()
        .map(|r| RemoteEntity::new(r.id, r.name))
        .collect();

    let store: Arc<dyn MappingStore> = if args.apply {
        let pool = mps_db::connect_from_env().await?;
        Arc::new(mps_db::PgMappingStore::new(pool))
    } else {
        tracing::debug!(%marketplace, "dry run; mappings are not persisted");
        Arc::new(InMemoryMappingStore::new())
    };
    let resolver = MappingResolver::new(store, args.min_confidence);

    println!(
        "marketplace={} kind={} candidates={} remote={} min_confidence={:.2} apply={}",
        marketplace,
        kind,
        candidates.len(),
        remote.len(),
        resolver.min_confidence(),
        args.apply
    );

    let mut report = BulkReport::default();
    for c in &candidates {
        match resolver.auto_map(c, &remote).await {
            Ok(MapOutcome::Mapped(e)) => {
                report.mapped += 1;
                println!(
                    "local_id={} outcome=mapped remote_id={} score={:.2}",
                    c.local_id,
                    e.remote_id,
                    e.confidence
                );
            }
            Ok(MapOutcome::SkippedLowConfidence { best_score }) => {
                report.skipped_low_confidence += 1;
                println!(
                    "local_id={} outcome=skipped_low_confidence best_score={:.2}",
                    c.local_id, best_score
                );
            }
            Ok(MapOutcome::AlreadyManual(e)) => {
                report.already_manual += 1;
                println!(
                    "local_id={} outcome=already_manual remote_id={}",
                    c.local_id, e.remote_id
                );
            }
            Ok(MapOutcome::NoCandidates) => {
                report.no_candidates += 1;
                println!("local_id={} outcome=no_candidates", c.local_id);
            }
            Err(e) => {
                report.failed += 1;
                println!("local_id={} outcome=failed error={}", c.local_id, e);
            }
        }
    }
    Ok(report)
}

fn read_csv<T: for<'de> Deserialize<'de>>(path: &str) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open csv failed: {}", path))?;
    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("{}: bad row {}", path, i + 2)))
        .collect()
}
