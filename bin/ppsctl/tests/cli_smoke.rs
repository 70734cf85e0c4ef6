//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "tests"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "End-to-end smoke tests for the ppsctl binary."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const MAIN_ID: &str = "4a554622-d759-42b7-b830-79c9136d2f96";
const AD_GENERATOR_ID: &str = "4ba5c775-a8e4-449e-828f-19f938e3710b";
const BLUEPRINT_ID: &str = "e5749058-500d-4333-8938-c8a19b16cd65";

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(
        root.join("pps.toml"),
        format!(
            "[store]\nbackend = \"file\"\ndata_dir = \"{}\"\n\n[logging]\ndirectory = \"{}\"\n\n[metrics]\ndump_path = \"{}\"\n",
            root.join("data").display(),
            root.join("logs").display(),
            root.join("metrics.prom").display(),
        ),
    )
    .unwrap();
    fs::write(
        root.join("purchases.jsonl"),
        concat!(
            r#"{"id":"p-bundle","user_id":"u-1","status":"completed","include_ad_generator":true,"metadata":{"includeBlueprint":"false"}}"#,
            "\n",
            r#"{"id":"p-pending","user_id":"u-2","status":"pending","product_id":"pricing-template","payment_reference":"cs_test_1"}"#,
            "\n",
        ),
    )
    .unwrap();
    dir
}

fn ppsctl(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ppsctl").unwrap();
    cmd.current_dir(root).env_remove("PPS_CONFIG");
    cmd
}

fn json(root: &Path, args: &[&str]) -> Value {
    let output = ppsctl(root).arg("--json").args(args).output().unwrap();
    assert!(
        output.status.success(),
        "ppsctl {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn import_then_query_round_trip() {
    let dir = workspace();
    let root = dir.path();

    let summary = json(root, &["import", "purchases.jsonl", "--process"]);
    assert_eq!(summary["imported"], 2);
    assert_eq!(summary["reports"][0]["disposition"], "reconciled");
    assert_eq!(summary["reports"][1]["disposition"], "not_completed");

    let check = json(root, &["check", "u-1", "pmu-ad-generator"]);
    assert_eq!(check["active"], true);
    let check = json(root, &["check", "u-1", BLUEPRINT_ID]);
    assert_eq!(check["active"], false);
    assert_eq!(check["state"], "none");

    let rows = json(root, &["list", "u-1"]);
    let mut products: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["product_id"].as_str().unwrap())
        .collect();
    products.sort_unstable();
    let mut expected = vec![MAIN_ID, AD_GENERATOR_ID];
    expected.sort_unstable();
    assert_eq!(products, expected);

    assert!(root.join("data/store.snapshot.json").exists());
    assert!(root.join("metrics.prom").exists());
}

#[test]
fn complete_then_repair_is_a_no_op() {
    let dir = workspace();
    let root = dir.path();
    json(root, &["import", "purchases.jsonl"]);

    let reports = json(root, &["complete", "cs_test_1"]);
    assert_eq!(reports.as_array().unwrap().len(), 1);
    assert_eq!(reports[0]["marked_processed"], true);

    let batch = json(root, &["repair"]);
    assert_eq!(batch["reports"].as_array().unwrap().len(), 1);

    let batch = json(root, &["repair"]);
    assert!(batch["reports"].as_array().unwrap().is_empty());
    assert!(batch["failures"].as_array().unwrap().is_empty());
}

#[test]
fn catalog_lists_builtin_products() {
    let dir = workspace();
    let output = ppsctl(dir.path()).arg("catalog").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("PMU Profit System"));
    assert!(text.contains("consultation-success-blueprint"));
}

#[test]
fn grant_rejects_unknown_products() {
    let dir = workspace();
    ppsctl(dir.path())
        .args(["grant", "u-1", "mystery-product"])
        .assert()
        .failure();
}

#[test]
fn missing_explicit_config_fails() {
    let dir = workspace();
    ppsctl(dir.path())
        .args(["--config", "absent.toml", "catalog"])
        .assert()
        .failure();
}
