use std::io::Write;

use predicates::prelude::*;

fn csv(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

fn automap(local: &tempfile::NamedTempFile, remote: &tempfile::NamedTempFile) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("mps-cli").unwrap();
    cmd.args([
        "automap",
        "--marketplace",
        "n11",
        "--local",
        local.path().to_str().unwrap(),
        "--remote",
        remote.path().to_str().unwrap(),
    ]);
    cmd
}

#[test]
fn exact_name_maps_and_near_miss_is_skipped_under_strict_threshold() {
    let local = csv("local_id,name\nL1,Kadın Ayakkabı\nL2,Kadın Çanta\n");
    let remote = csv("id,name\nc1,Kadın Ayakkabı\nc2,Kadın Çantaları ve Cüzdanlar\n");

    automap(&local, &remote)
        .args(["--min-confidence", "0.99"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_id=L1 outcome=mapped remote_id=c1 score=1.00"))
        .stdout(predicate::str::contains("local_id=L2 outcome=skipped_low_confidence"))
        .stdout(predicate::str::contains(
            "mapped=1 skipped_low_confidence=1 already_manual=0 no_candidates=0 failed=0",
        ));
}

#[test]
fn empty_remote_catalog_reports_no_candidates() {
    let local = csv("local_id,name\nL1,Saat\n");
    let remote = csv("id,name\n");

    automap(&local, &remote)
        .assert()
        .success()
        .stdout(predicate::str::contains("local_id=L1 outcome=no_candidates"))
        .stdout(predicate::str::contains("no_candidates=1"));
}

#[test]
fn threshold_comes_from_config_when_not_overridden() {
    let local = csv("local_id,name\nL1,Kadın Ayakkabı\n");
    let remote = csv("id,name\nc1,Kadın Ayakkabı\n");
    let mut cfg = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    cfg.write_all(b"mapping:\n  min_confidence: 0.85\n").unwrap();

    automap(&local, &remote)
        .args(["--config", cfg.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("min_confidence=0.85"))
        .stdout(predicate::str::contains("mapped=1"));
}

#[test]
fn unknown_kind_is_rejected() {
    let local = csv("local_id,name\nL1,Saat\n");
    let remote = csv("id,name\nc1,Saat\n");

    automap(&local, &remote)
        .args(["--kind", "color"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --kind 'color'"));
}

#[test]
fn unknown_marketplace_is_rejected() {
    let local = csv("local_id,name\nL1,Saat\n");
    let remote = csv("id,name\nc1,Saat\n");
    assert_cmd::Command::cargo_bin("mps-cli")
        .unwrap()
        .args([
            "automap",
            "--marketplace",
            "ebay",
            "--local",
            local.path().to_str().unwrap(),
            "--remote",
            remote.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ebay"));
}
