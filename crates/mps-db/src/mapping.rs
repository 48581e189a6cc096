use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_mapping::{MappingStore, Upsert};
use mps_schemas::{MappingEntry, MappingKey, MappingKind, MappingMethod, MarketplaceId};
use sqlx::{PgPool, Row};

/// [`MappingStore`] over the `mapping_entries` table. Manual precedence is
/// enforced inside the upsert statement, so concurrent writers cannot race
/// an auto entry over a manual one.
#[derive(Clone)]
pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<MappingEntry> {
    let marketplace: String = row.try_get("marketplace")?;
    let kind: String = row.try_get("kind")?;
    let method: String = row.try_get("method")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(MappingEntry {
        local_id: row.try_get("local_id")?,
        marketplace: MarketplaceId::parse(&marketplace).map_err(|e| anyhow!("{e}"))?,
        kind: MappingKind::parse(&kind).ok_or_else(|| anyhow!("unknown mapping kind {kind}"))?,
        remote_id: row.try_get("remote_id")?,
        remote_name: row.try_get("remote_name")?,
        method: MappingMethod::parse(&method)
            .ok_or_else(|| anyhow!("unknown mapping method {method}"))?,
        confidence: row.try_get("confidence")?,
        updated_at,
    })
}

const SELECT_COLUMNS: &str =
    "select local_id, marketplace, kind, remote_id, remote_name, method, confidence, updated_at from mapping_entries";

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn get(&self, key: &MappingKey) -> Result<Option<MappingEntry>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} where local_id = $1 and marketplace = $2 and kind = $3"
        ))
        .bind(&key.local_id)
        .bind(key.marketplace.as_str())
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("mapping get failed for {key}"))?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn upsert(&self, entry: MappingEntry) -> Result<Upsert> {
        let written = sqlx::query(
            r#"
            insert into mapping_entries (
              local_id, marketplace, kind, remote_id, remote_name, method, confidence, updated_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            on conflict (local_id, marketplace, kind) do update set
              remote_id   = excluded.remote_id,
              remote_name = excluded.remote_name,
              method      = excluded.method,
              confidence  = excluded.confidence,
              updated_at  = excluded.updated_at
            where mapping_entries.method <> 'manual' or excluded.method = 'manual'
            returning local_id
            "#,
        )
        .bind(&entry.local_id)
        .bind(entry.marketplace.as_str())
        .bind(entry.kind.as_str())
        .bind(&entry.remote_id)
        .bind(&entry.remote_name)
        .bind(entry.method.as_str())
        .bind(entry.confidence)
        .bind(entry.updated_at)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("mapping upsert failed for {}", entry.key()))?;

        if written.is_some() {
            return Ok(Upsert::Written);
        }
        let key = entry.key();
        match self.get(&key).await? {
            Some(existing) => Ok(Upsert::KeptManual(existing)),
            None => Err(anyhow!("mapping upsert for {key} neither wrote nor found a row")),
        }
    }

    async fn remove(&self, key: &MappingKey) -> Result<bool> {
        let res = sqlx::query(
            "delete from mapping_entries where local_id = $1 and marketplace = $2 and kind = $3",
        )
        .bind(&key.local_id)
        .bind(key.marketplace.as_str())
        .bind(key.kind.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("mapping remove failed for {key}"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(
        &self,
        marketplace: Option<MarketplaceId>,
        kind: Option<MappingKind>,
    ) -> Result<Vec<MappingEntry>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} where ($1::text is null or marketplace = $1) and ($2::text is null or kind = $2)"
        ))
        .bind(marketplace.map(|m| m.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("mapping list failed")?;
        let mut entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(MappingEntry::key);
        Ok(entries)
    }
}
