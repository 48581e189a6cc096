//! Config hash stability.
//!
//! GREEN when:
//! - Loading the same inputs twice yields identical hashes.
//! - Reordering keys within YAML doesn't change the hash.
//! - Different values produce different hashes.
//! - Overlays take effect and the merged hash is stable.

use mps_config::{load_layered_yaml, load_layered_yaml_from_strings};

const BASE_YAML: &str = r#"
retry:
  max_attempts: 4
  initial_backoff_ms: 200
mapping:
  min_confidence: 0.70
marketplaces:
  trendyol:
    enabled: true
    account_id: "100200"
    keys_env:
      api_key: "MPS_TRENDYOL_API_KEY"
      api_secret: "MPS_TRENDYOL_API_SECRET"
    rate_limit:
      limit: 50
      window_ms: 10000
"#;

const BASE_YAML_REORDERED: &str = r#"
marketplaces:
  trendyol:
    rate_limit:
      window_ms: 10000
      limit: 50
    keys_env:
      api_secret: "MPS_TRENDYOL_API_SECRET"
      api_key: "MPS_TRENDYOL_API_KEY"
    account_id: "100200"
    enabled: true
mapping:
  min_confidence: 0.70
retry:
  initial_backoff_ms: 200
  max_attempts: 4
"#;

const OVERLAY_YAML: &str = r#"
marketplaces:
  trendyol:
    price_margin: 0.12
    stock_buffer: 2
mapping:
  min_confidence: 0.80
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(
        original.config_hash, reordered.config_hash,
        "reordering keys in YAML must not change the hash"
    );
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_takes_effect_in_typed_settings() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let settings = loaded.settings().unwrap();

    assert!((settings.mapping.min_confidence - 0.80).abs() < 1e-9);
    let ty = settings
        .marketplace(mps_schemas::MarketplaceId::Trendyol)
        .unwrap();
    assert!(ty.enabled, "overlay must not clobber sibling keys");
    assert_eq!(ty.account_id, "100200");
    assert_eq!(ty.stock_buffer, 2);
    assert!((ty.price_margin - 0.12).abs() < 1e-9);
    assert_eq!(ty.rate_limit.limit, 50);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn files_on_disk_load_in_merge_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, OVERLAY_YAML).unwrap();

    let from_files = load_layered_yaml(&[
        base.to_str().unwrap(),
        overlay.to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_is_reported_with_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.yaml"));
}
