//! mps-config
//!
//! Layered YAML configuration for the sync engine.
//!
//! - Documents are deep-merged in order (base first, overlays after).
//! - The merged document is canonicalized to JSON and hashed (SHA-256) so a
//!   running daemon can report exactly which configuration it booted with.
//! - Literal secrets are refused: YAML stores env var NAMES only, and
//!   [`secrets::resolve_marketplace_secrets`] resolves them once at startup.
//! - [`settings::SyncSettings`] is the typed view every other crate consumes.

pub mod secrets;
pub mod settings;

pub use settings::{
    CatalogSettings, EngineSettings, MappingSettings, MarketplaceSettings, RateLimitSettings,
    RetrySettings, SyncSettings,
};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Leading fragments of credentials that must never appear as literals.
/// Marketplace keys are opaque, so only formats with a recognisable prefix
/// can be caught here.
const SECRET_PREFIXES: &[&str] = &[
    "amzn1.",     // Amazon LWA client ids / refresh tokens
    "Atzr|",      // Amazon LWA refresh token
    "AKIA",       // AWS access key id (SP-API IAM user)
    "sk-",
    "sk_live",
    "sk_test",
    "-----BEGIN", // PEM
    "ghp_",
    "glpat-",
    "xoxb-",
];

/// Shorter strings are ids or flags, not credentials.
const MIN_SECRET_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    /// Merged document, keys sorted, no insignificant whitespace.
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document.
    pub fn settings(&self) -> Result<SyncSettings> {
        SyncSettings::from_config_json(&self.config_json)
    }
}

/// Read and merge YAML files in the given order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).with_context(|| format!("read config layer {p}")))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

/// Merge in-memory YAML documents; later documents win.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("config layer {i} is not valid yaml"))?;
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("config layer {i} cannot be represented as json"))?;
        merge_into(&mut merged, layer);
    }

    if let Some(pointer) = find_secret_literal(&merged, &mut String::new()) {
        bail!("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED");
    }

    // serde_json's default Map is ordered by key, so this is canonical.
    let canonical_json = serde_json::to_string(&merged).context("serialize merged config")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `overlay` replaces `base`.
fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge_into(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// JSON pointer of the first string leaf that looks like a credential.
fn find_secret_literal(v: &Value, path: &mut String) -> Option<String> {
    match v {
        Value::String(s) if looks_like_secret(s) => Some(if path.is_empty() {
            "/".to_string()
        } else {
            path.clone()
        }),
        Value::Object(map) => map.iter().find_map(|(k, child)| {
            let len = path.len();
            path.push('/');
            path.push_str(&k.replace('~', "~0").replace('/', "~1"));
            let hit = find_secret_literal(child, path);
            path.truncate(len);
            hit
        }),
        Value::Array(items) => items.iter().enumerate().find_map(|(i, child)| {
            let len = path.len();
            path.push('/');
            path.push_str(&i.to_string());
            let hit = find_secret_literal(child, path);
            path.truncate(len);
            hit
        }),
        _ => None,
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= MIN_SECRET_LEN && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_replaces_leaves_and_keeps_siblings() {
        let mut base = json!({"retry": {"max_attempts": 4, "jitter": true}, "mapping": {}});
        merge_into(&mut base, json!({"retry": {"max_attempts": 6}}));
        assert_eq!(
            base,
            json!({"retry": {"max_attempts": 6, "jitter": true}, "mapping": {}})
        );
    }

    #[test]
    fn overlay_scalar_replaces_object() {
        let mut base = json!({"catalog": {"base_url": "http://a"}});
        merge_into(&mut base, json!({"catalog": null}));
        assert_eq!(base, json!({"catalog": null}));
    }

    #[test]
    fn short_strings_are_never_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("sk-live-0123456789"));
        assert!(looks_like_secret("Atzr|IwEBIExample"));
    }

    #[test]
    fn secret_pointer_is_escaped() {
        let v = json!({"a/b": {"c~d": ["ok", "amzn1.application-oa2-client.x"]}});
        assert_eq!(
            find_secret_literal(&v, &mut String::new()).as_deref(),
            Some("/a~1b/c~0d/1")
        );
        assert_eq!(find_secret_literal(&json!({"k": "MPS_KEY"}), &mut String::new()), None);
    }
}
