use mps_mapping::{MapOutcome, MappingCandidate, MappingStore, RemoteEntity};
use mps_schemas::{ErrorKind, MappingKey, MappingKind, MappingMethod, MarketplaceId};
use mps_testkit::Harness;

const YAML: &str = r#"
mapping:
  min_confidence: 0.70
marketplaces:
  trendyol:
    enabled: true
    account_id: "supplier-1"
"#;

fn candidate(local_id: &str, name: &str) -> MappingCandidate {
    MappingCandidate {
        local_id: local_id.to_string(),
        local_name: name.to_string(),
        kind: MappingKind::Category,
        marketplace: MarketplaceId::Trendyol,
    }
}

#[tokio::test]
async fn near_miss_below_threshold_creates_no_mapping() {
    let h = Harness::build(YAML, Vec::new(), &[]).unwrap();
    let remote = vec![RemoteEntity::new("411", "Kadın Çanta")];

    let outcome = h
        .resolver
        .auto_map(&candidate("C-10", "Kadın Ayakkabı"), &remote)
        .await
        .unwrap();

    let MapOutcome::SkippedLowConfidence { best_score } = outcome else {
        panic!("expected a skip, got {outcome:?}");
    };
    assert!(best_score < 0.70, "best_score={best_score}");
    assert!(h.mappings.is_empty().await);

    let err = h
        .resolver
        .resolve("C-10", MappingKind::Category, MarketplaceId::Trendyol)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MappingNotFound);
}

#[tokio::test]
async fn auto_map_never_replaces_an_operator_mapping() {
    let h = Harness::build(YAML, Vec::new(), &[]).unwrap();
    let chosen = RemoteEntity::new("900", "Ayakkabı & Çanta");
    h.resolver
        .set_manual("C-10", MappingKind::Category, MarketplaceId::Trendyol, &chosen)
        .await
        .unwrap();

    let remote = vec![RemoteEntity::new("412", "Kadın Ayakkabı")];
    let outcome = h
        .resolver
        .auto_map(&candidate("C-10", "Kadın Ayakkabı"), &remote)
        .await
        .unwrap();
    assert!(matches!(outcome, MapOutcome::AlreadyManual(ref e) if e.remote_id == "900"));

    let stored = h
        .mappings
        .get(&MappingKey::new("C-10", MarketplaceId::Trendyol, MappingKind::Category))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.method, MappingMethod::Manual);
    assert_eq!(stored.remote_id, "900");
    assert_eq!(stored.confidence, 1.0);
}

#[tokio::test]
async fn bulk_run_maps_exact_names_and_skips_the_rest() {
    let h = Harness::build(YAML, Vec::new(), &[]).unwrap();
    let remote = vec![
        RemoteEntity::new("412", "Kadın Ayakkabı"),
        RemoteEntity::new("411", "Kadın Çanta"),
    ];
    let candidates = vec![
        candidate("C-10", "kadın  ayakkabı"),
        candidate("C-11", "Erkek Saat"),
    ];

    let report = h.resolver.bulk_auto_map(&candidates, &remote).await;
    assert_eq!(report.mapped, 1);
    assert_eq!(report.skipped_low_confidence, 1);
    assert_eq!(report.failed, 0);

    let entry = h
        .resolver
        .resolve("C-10", MappingKind::Category, MarketplaceId::Trendyol)
        .await
        .unwrap();
    assert_eq!(entry.remote_id, "412");
    assert_eq!(entry.method, MappingMethod::Auto);
    assert_eq!(h.mappings.len().await, 1);
}
