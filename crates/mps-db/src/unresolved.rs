use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_reconcile::{ParkedEvent, UnresolvedStore};
use mps_schemas::{EventKey, InboundEvent};
use sqlx::types::Json;
use sqlx::PgPool;

/// [`UnresolvedStore`] over `unresolved_events`. Re-parking an event
/// replaces its row.
#[derive(Clone)]
pub struct PgUnresolvedStore {
    pool: PgPool,
}

impl PgUnresolvedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnresolvedStore for PgUnresolvedStore {
    async fn park(&self, parked: &ParkedEvent) -> Result<()> {
        let key = parked.event.key();
        sqlx::query(
            r#"
            insert into unresolved_events
              (marketplace, external_id, event_type, event, reason, parked_at)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (marketplace, external_id, event_type) do update set
              event     = excluded.event,
              reason    = excluded.reason,
              parked_at = excluded.parked_at
            "#,
        )
        .bind(key.marketplace.as_str())
        .bind(&key.external_id)
        .bind(key.event_type.as_str())
        .bind(Json(&parked.event))
        .bind(&parked.reason)
        .bind(parked.parked_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("unresolved_events upsert failed for {key}"))?;
        Ok(())
    }

    async fn remove(&self, key: &EventKey) -> Result<bool> {
        let res = sqlx::query(
            r#"
            delete from unresolved_events
            where marketplace = $1 and external_id = $2 and event_type = $3
            "#,
        )
        .bind(key.marketplace.as_str())
        .bind(&key.external_id)
        .bind(key.event_type.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("unresolved_events delete failed for {key}"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn load(&self) -> Result<Vec<ParkedEvent>> {
        let rows: Vec<(Json<InboundEvent>, String, DateTime<Utc>)> = sqlx::query_as(
            "select event, reason, parked_at from unresolved_events order by parked_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("unresolved_events load failed")?;
        Ok(rows
            .into_iter()
            .map(|(Json(event), reason, parked_at)| ParkedEvent {
                event,
                reason,
                parked_at,
            })
            .collect())
    }
}
