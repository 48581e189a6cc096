//! Secret handling: literals refused at load, names resolved at startup.
//!
//! Resolution tests inject a lookup closure instead of mutating the process
//! environment, so they are safe under parallel test execution.

use std::collections::HashMap;

use mps_config::load_layered_yaml_from_strings;
use mps_config::secrets::resolve_marketplace_secrets_with;
use mps_schemas::MarketplaceId;

fn settings(yaml: &str) -> mps_config::SyncSettings {
    load_layered_yaml_from_strings(&[yaml])
        .expect("test yaml must parse cleanly")
        .settings()
        .expect("test yaml must match the settings schema")
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| map.get(name).cloned()
}

const TWO_MARKETS: &str = r#"
marketplaces:
  trendyol:
    enabled: true
    keys_env:
      api_key: "TY_KEY"
      api_secret: "TY_SECRET"
      webhook_secret: "TY_HOOK"
  n11:
    enabled: false
    keys_env:
      api_key: "N11_KEY"
      api_secret: "N11_SECRET"
"#;

#[test]
fn literal_secret_value_rejected() {
    let yaml = r#"
marketplaces:
  amazon:
    keys_env:
      refresh_token: "Atzr|IwEBIAbCdEf123456"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err().to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "got: {err}");
    assert!(!err.contains("IwEBIAbCdEf"), "secret value must not leak: {err}");
}

#[test]
fn enabled_marketplace_resolves_all_fields() {
    let s = settings(TWO_MARKETS);
    let resolved = resolve_marketplace_secrets_with(
        &s,
        env(&[("TY_KEY", "k"), ("TY_SECRET", "s"), ("TY_HOOK", "h")]),
    )
    .unwrap();

    let ty = resolved.get(MarketplaceId::Trendyol).unwrap();
    assert_eq!(ty.api_key, "k");
    assert_eq!(ty.api_secret, "s");
    assert_eq!(resolved.webhook_secret(MarketplaceId::Trendyol), Some("h"));
}

#[test]
fn disabled_marketplace_is_skipped() {
    let s = settings(TWO_MARKETS);
    let resolved =
        resolve_marketplace_secrets_with(&s, env(&[("TY_KEY", "k"), ("TY_SECRET", "s")])).unwrap();
    assert!(resolved.get(MarketplaceId::N11).is_none());
    assert_eq!(resolved.webhook_secret(MarketplaceId::Trendyol), None);
}

#[test]
fn missing_required_key_names_the_var() {
    let s = settings(TWO_MARKETS);
    let err = resolve_marketplace_secrets_with(&s, env(&[("TY_KEY", "value-xyz")]))
        .unwrap_err()
        .to_string();
    assert!(err.contains("SECRETS_MISSING"), "got: {err}");
    assert!(err.contains("TY_SECRET"), "error must name the var: {err}");
    assert!(!err.contains("value-xyz"), "error must not echo values: {err}");
}

#[test]
fn blank_values_count_as_missing() {
    let s = settings(TWO_MARKETS);
    let result = resolve_marketplace_secrets_with(&s, env(&[("TY_KEY", "  "), ("TY_SECRET", "s")]));
    assert!(result.is_err());
}

#[test]
fn default_env_names_are_derived_from_marketplace() {
    let s = settings("marketplaces:\n  pazarama:\n    enabled: true\n");
    let resolved = resolve_marketplace_secrets_with(
        &s,
        env(&[("MPS_PAZARAMA_API_KEY", "k"), ("MPS_PAZARAMA_API_SECRET", "s")]),
    )
    .unwrap();
    assert!(resolved.get(MarketplaceId::Pazarama).is_some());
}

#[test]
fn amazon_requires_refresh_token() {
    let s = settings("marketplaces:\n  amazon:\n    enabled: true\n");
    let err = resolve_marketplace_secrets_with(
        &s,
        env(&[("MPS_AMAZON_API_KEY", "k"), ("MPS_AMAZON_API_SECRET", "s")]),
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("MPS_AMAZON_REFRESH_TOKEN"), "got: {err}");
}

#[test]
fn debug_output_is_redacted() {
    let s = settings(TWO_MARKETS);
    let resolved = resolve_marketplace_secrets_with(
        &s,
        env(&[("TY_KEY", "plain-key"), ("TY_SECRET", "plain-secret"), ("TY_HOOK", "plain-hook")]),
    )
    .unwrap();
    let dbg = format!("{resolved:?}");
    assert!(!dbg.contains("plain-key"));
    assert!(!dbg.contains("plain-secret"));
    assert!(!dbg.contains("plain-hook"));
    assert!(dbg.contains("REDACTED"));
}
