//! Assembles one [`MarketplaceClient`] per enabled marketplace, sharing a
//! single credential store and rate limiter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mps_config::secrets::ResolvedSecrets;
use mps_config::SyncSettings;
use mps_schemas::MarketplaceId;

use crate::adapter::MarketplaceAdapter;
use crate::adapters::build_adapter;
use crate::client::{MarketplaceClient, ResultSink};
use crate::credentials::CredentialStore;
use crate::rate_limit::{RateLimiter, WindowConfig};
use crate::retry::{RetryExecutor, RetryPolicy};

pub struct ClientRegistry {
    clients: BTreeMap<MarketplaceId, Arc<MarketplaceClient>>,
    credentials: Arc<CredentialStore>,
    limiter: Arc<RateLimiter>,
}

impl ClientRegistry {
    /// Build clients for every enabled marketplace from settings and the
    /// secrets resolved at startup.
    pub fn from_settings(
        settings: &SyncSettings,
        secrets: &ResolvedSecrets,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let adapters = settings
            .enabled_marketplaces()
            .into_iter()
            .map(|m| {
                let ms = settings
                    .marketplace(m)
                    .with_context(|| format!("no settings for enabled marketplace {m}"))?;
                build_adapter(m, ms)
                    .with_context(|| format!("failed to build adapter for {m}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_adapters(
            settings,
            Arc::new(CredentialStore::from_secrets(settings, secrets)),
            adapters,
            sink,
        )
    }

    /// Same as [`from_settings`] with caller-supplied adapters (tests, fakes).
    ///
    /// [`from_settings`]: ClientRegistry::from_settings
    pub fn with_adapters(
        settings: &SyncSettings,
        credentials: Arc<CredentialStore>,
        adapters: Vec<Arc<dyn MarketplaceAdapter>>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let mut limiter = RateLimiter::default();
        for (m, ms) in &settings.marketplaces {
            limiter = limiter.with_config(*m, WindowConfig::from(&ms.rate_limit));
        }
        let limiter = Arc::new(limiter);
        let policy = RetryPolicy::from(&settings.retry);

        let mut clients = BTreeMap::new();
        for adapter in adapters {
            let m = adapter.marketplace();
            let ms = settings.marketplace(m).cloned().unwrap_or_default();
            let client = MarketplaceClient::new(
                adapter,
                ms.account_id.clone(),
                credentials.clone(),
                limiter.clone(),
                RetryExecutor::new(policy.clone()),
                sink.clone(),
            )
            .with_call_timeout(Duration::from_millis(ms.timeout_ms));
            tracing::info!(marketplace = %m, account = %ms.account_id, "marketplace client ready");
            clients.insert(m, Arc::new(client));
        }

        Ok(Self {
            clients,
            credentials,
            limiter,
        })
    }

    pub fn get(&self, m: MarketplaceId) -> Option<Arc<MarketplaceClient>> {
        self.clients.get(&m).cloned()
    }

    pub fn marketplaces(&self) -> Vec<MarketplaceId> {
        self.clients.keys().copied().collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<MarketplaceClient>> {
        self.clients.values()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
