use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_runtime::WatermarkStore;
use mps_schemas::MarketplaceId;
use sqlx::PgPool;

/// [`WatermarkStore`] over `sync_watermarks`. The upsert keeps the later of
/// the stored and the offered instant.
#[derive(Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn load(&self, m: MarketplaceId) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("select synced_at from sync_watermarks where marketplace = $1")
                .bind(m.as_str())
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("watermark load failed for {m}"))?;
        Ok(row.map(|(at,)| at))
    }

    async fn advance(&self, m: MarketplaceId, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let (at,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            insert into sync_watermarks (marketplace, synced_at, updated_at)
            values ($1, $2, now())
            on conflict (marketplace) do update set
              synced_at  = greatest(sync_watermarks.synced_at, excluded.synced_at),
              updated_at = now()
            returning synced_at
            "#,
        )
        .bind(m.as_str())
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("watermark advance failed for {m}"))?;
        if at > to {
            tracing::debug!(marketplace = %m, stored = %at, offered = %to, "watermark already ahead");
        }
        Ok(at)
    }

    async fn all(&self) -> Result<BTreeMap<MarketplaceId, DateTime<Utc>>> {
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("select marketplace, synced_at from sync_watermarks")
                .fetch_all(&self.pool)
                .await
                .context("watermark list failed")?;
        rows.into_iter()
            .map(|(m, at)| {
                MarketplaceId::parse(&m)
                    .map(|m| (m, at))
                    .map_err(|e| anyhow!("{e}"))
            })
            .collect()
    }
}
