//! mps-db
//!
//! Postgres persistence for the sync engine: taxonomy mappings, per
//! marketplace watermarks, the processed-event ledger and parked events.
//! Runtime queries only, so builds never need a live database.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod events;
mod mapping;
mod unresolved;
mod watermark;

pub use events::PgEventLedger;
pub use mapping::PgMappingStore;
pub use unresolved::PgUnresolvedStore;
pub use watermark::PgWatermarkStore;

pub const ENV_DB_URL: &str = "MPS_DATABASE_URL";

/// Connect to Postgres using MPS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub has_mapping_table: bool,
    pub has_watermark_table: bool,
    pub has_event_table: bool,
    pub has_unresolved_table: bool,
}

impl DbStatus {
    pub fn is_migrated(&self) -> bool {
        self.has_mapping_table
            && self.has_watermark_table
            && self.has_event_table
            && self.has_unresolved_table
    }
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_mapping_table: table_exists(pool, "mapping_entries").await?,
        has_watermark_table: table_exists(pool, "sync_watermarks").await?,
        has_event_table: table_exists(pool, "processed_events").await?,
        has_unresolved_table: table_exists(pool, "unresolved_events").await?,
    })
}

async fn table_exists(pool: &PgPool, table: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .with_context(|| format!("status table-exists query failed for {table}"))?;
    Ok(exists)
}
