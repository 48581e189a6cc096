//! Typed view over the merged configuration document.
//!
//! Every field has a default so a minimal YAML (just the marketplaces that
//! are enabled) is a valid configuration. Validation that serde cannot
//! express lives in [`SyncSettings::validate`].

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use mps_schemas::MarketplaceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub mapping: MappingSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub marketplaces: BTreeMap<MarketplaceId, MarketplaceSettings>,
}

impl SyncSettings {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let settings: SyncSettings = serde_json::from_value(config_json.clone())
            .context("config does not match the sync settings schema")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.retry.max_attempts) {
            bail!(
                "CONFIG_INVALID retry.max_attempts={} (expected 1..=10)",
                self.retry.max_attempts
            );
        }
        if !(0.0..=1.0).contains(&self.mapping.min_confidence) {
            bail!(
                "CONFIG_INVALID mapping.min_confidence={} (expected 0.0..=1.0)",
                self.mapping.min_confidence
            );
        }
        if self.engine.max_in_flight == 0 {
            bail!("CONFIG_INVALID engine.max_in_flight must be > 0");
        }
        for (m, s) in &self.marketplaces {
            if s.rate_limit.limit == 0 || s.rate_limit.window_ms == 0 {
                bail!("CONFIG_INVALID marketplaces.{m}.rate_limit: limit and window_ms must be > 0");
            }
            if s.price_margin < 0.0 {
                bail!("CONFIG_INVALID marketplaces.{m}.price_margin must be >= 0");
            }
            if s.stock_buffer < 0 {
                bail!("CONFIG_INVALID marketplaces.{m}.stock_buffer must be >= 0");
            }
        }
        Ok(())
    }

    /// Marketplaces with `enabled: true`, in stable order.
    pub fn enabled_marketplaces(&self) -> Vec<MarketplaceId> {
        self.marketplaces
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(m, _)| *m)
            .collect()
    }

    pub fn marketplace(&self, m: MarketplaceId) -> Option<&MarketplaceSettings> {
        self.marketplaces.get(&m)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Concurrent event applications before the engine signals backpressure.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Capacity of the webhook overflow queue.
    #[serde(default = "default_overflow_queue_depth")]
    pub overflow_queue_depth: usize,
}

fn default_max_in_flight() -> usize {
    64
}

fn default_overflow_queue_depth() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            overflow_queue_depth: default_overflow_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSettings {
    /// Auto/assisted candidates scoring below this are never persisted.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    0.70
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_catalog_base_url() -> String {
    "http://127.0.0.1:8080/api/marketplace".to_string()
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: u32,
}

fn default_rate_limit() -> u32 {
    50
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_max_queue_depth() -> u32 {
    100
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_ms: default_window_ms(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// Env var NAMES for one marketplace account. Never values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysEnv {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Overrides the adapter's production base URL (sandbox, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Supplier / merchant / seller id, depending on the marketplace.
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub keys_env: KeysEnv,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Markup applied to the local price before pushing (0.10 = +10%).
    #[serde(default)]
    pub price_margin: f64,
    /// Units held back from the marketplace when pushing stock.
    #[serde(default)]
    pub stock_buffer: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            account_id: String::new(),
            keys_env: KeysEnv::default(),
            rate_limit: RateLimitSettings::default(),
            sync_interval_secs: default_sync_interval_secs(),
            price_margin: 0.0,
            stock_buffer: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}
