//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"MPS_TRENDYOL_API_KEY"`).
//! - At startup, callers invoke [`resolve_marketplace_secrets`] once and pass
//!   the result into the credential store; nothing else reads `std::env`.
//! - `Debug` impls on all secret-containing structs **redact** values.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! # Enforcement
//! | Marketplace state | Required                                          |
//! |-------------------|---------------------------------------------------|
//! | enabled           | api_key, api_secret (+ refresh_token for Amazon)  |
//! | disabled          | nothing (skipped entirely)                        |
//!
//! Webhook secrets are always optional; without one, signatures are not
//! checked for that marketplace.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use mps_schemas::MarketplaceId;

use crate::settings::{MarketplaceSettings, SyncSettings};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Secrets for one marketplace account. **Values are redacted in `Debug`.**
#[derive(Clone)]
pub struct MarketplaceSecrets {
    pub api_key: String,
    pub api_secret: String,
    pub refresh_token: Option<String>,
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for MarketplaceSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceSecrets")
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<REDACTED>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// All resolved secrets, keyed by enabled marketplace.
#[derive(Clone, Debug, Default)]
pub struct ResolvedSecrets {
    pub marketplaces: BTreeMap<MarketplaceId, MarketplaceSecrets>,
}

impl ResolvedSecrets {
    pub fn get(&self, m: MarketplaceId) -> Option<&MarketplaceSecrets> {
        self.marketplaces.get(&m)
    }

    pub fn webhook_secret(&self, m: MarketplaceId) -> Option<&str> {
        self.get(m).and_then(|s| s.webhook_secret.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Env var names
// ---------------------------------------------------------------------------

struct SecretEnvNames {
    api_key_var: String,
    api_secret_var: String,
    refresh_token_var: String,
    webhook_secret_var: String,
}

/// Names come from `keys_env`; absent entries fall back to
/// `MPS_<MARKETPLACE>_<FIELD>`.
fn env_names(m: MarketplaceId, s: &MarketplaceSettings) -> SecretEnvNames {
    let prefix = format!("MPS_{}", m.as_str().to_ascii_uppercase());
    let pick = |configured: &Option<String>, suffix: &str| {
        configured
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{prefix}_{suffix}"))
    };
    SecretEnvNames {
        api_key_var: pick(&s.keys_env.api_key, "API_KEY"),
        api_secret_var: pick(&s.keys_env.api_secret, "API_SECRET"),
        refresh_token_var: pick(&s.keys_env.refresh_token, "REFRESH_TOKEN"),
        webhook_secret_var: pick(&s.keys_env.webhook_secret, "WEBHOOK_SECRET"),
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Resolve secrets for every enabled marketplace from the process environment.
pub fn resolve_marketplace_secrets(settings: &SyncSettings) -> Result<ResolvedSecrets> {
    resolve_marketplace_secrets_with(settings, resolve_env)
}

/// Same as [`resolve_marketplace_secrets`] with an injectable lookup.
///
/// # Errors
/// Names the first missing required env var. Values never appear in errors.
pub fn resolve_marketplace_secrets_with<F>(
    settings: &SyncSettings,
    lookup: F,
) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = BTreeMap::new();

    for (m, s) in settings.marketplaces.iter().filter(|(_, s)| s.enabled) {
        let names = env_names(*m, s);
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let Some(api_key) = get(&names.api_key_var) else {
            bail!(
                "SECRETS_MISSING marketplace={}: required env var '{}' (api_key) is not set or empty",
                m,
                names.api_key_var
            );
        };
        let Some(api_secret) = get(&names.api_secret_var) else {
            bail!(
                "SECRETS_MISSING marketplace={}: required env var '{}' (api_secret) is not set or empty",
                m,
                names.api_secret_var
            );
        };
        let refresh_token = get(&names.refresh_token_var);
        if *m == MarketplaceId::Amazon && refresh_token.is_none() {
            bail!(
                "SECRETS_MISSING marketplace={}: required env var '{}' (refresh_token) is not set or empty",
                m,
                names.refresh_token_var
            );
        }

        out.insert(
            *m,
            MarketplaceSecrets {
                api_key,
                api_secret,
                refresh_token,
                webhook_secret: get(&names.webhook_secret_var),
            },
        );
    }

    Ok(ResolvedSecrets { marketplaces: out })
}
