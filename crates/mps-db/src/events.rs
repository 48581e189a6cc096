use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_reconcile::EventLedger;
use mps_schemas::EventKey;
use sqlx::PgPool;

/// [`EventLedger`] over `processed_events`; dedupe is the primary key.
#[derive(Clone)]
pub struct PgEventLedger {
    pool: PgPool,
}

impl PgEventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for PgEventLedger {
    async fn is_processed(&self, key: &EventKey) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            select exists (
              select 1 from processed_events
              where marketplace = $1 and external_id = $2 and event_type = $3
            )
            "#,
        )
        .bind(key.marketplace.as_str())
        .bind(&key.external_id)
        .bind(key.event_type.as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("processed_events lookup failed for {key}"))?;
        Ok(exists)
    }

    async fn mark_processed(&self, key: &EventKey, at: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            insert into processed_events (marketplace, external_id, event_type, processed_at)
            values ($1, $2, $3, $4)
            on conflict do nothing
            "#,
        )
        .bind(key.marketplace.as_str())
        .bind(&key.external_id)
        .bind(key.event_type.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("processed_events insert failed for {key}"))?;
        Ok(res.rows_affected() == 1)
    }
}
