#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const NODES: usize = 50;

struct Workspace {
    dir: TempDir,
    region: PathBuf,
}

impl Workspace {
    fn config_path(&self) -> PathBuf {
        self.dir.path().join("cli.toml")
    }
}

fn nodetape(ws: &Workspace) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("nodetape");
    cmd.env("NODETAPE_CONFIG", ws.config_path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn setup_region(extra: &[&str]) -> Workspace {
    let dir = TempDir::new().unwrap();
    let region = dir.path().join("vectors.tape");
    let ws = Workspace { dir, region };
    nodetape(&ws)
        .args(["--dimensions", "8", "generate"])
        .arg(&ws.region)
        .args(["--count", &NODES.to_string(), "--seed", "42"])
        .args(extra)
        .assert()
        .success();
    ws
}

fn stderr_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

fn json_output(ws: &Workspace, args: &[&str], region: &Path) -> Value {
    let output = nodetape(ws)
        .args(["--format", "json"])
        .args(args)
        .arg(region)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn stats_reports_generated_tape() {
    let ws = setup_region(&[]);
    let json = json_output(&ws, &["stats"], &ws.region);

    let file_len = fs::metadata(&ws.region).unwrap().len();
    assert_eq!(json["layout"]["dimensions"].as_u64(), Some(8));
    assert_eq!(json["layout"]["scalar"].as_str(), Some("f32"));
    assert_eq!(json["tape"]["mode"].as_str(), Some("external_eager"));
    assert_eq!(json["tape"]["nodes"].as_u64(), Some(NODES as u64));
    assert_eq!(json["tape"]["region_bytes"].as_u64(), Some(file_len));
    assert_eq!(json["tape"]["tail_bytes"].as_u64(), Some(0));
    assert_eq!(json["tape"]["exact"].as_bool(), Some(true));
    assert_eq!(json["header"]["node_count"].as_u64(), Some(NODES as u64));
    assert_eq!(json["header"]["connectivity"].as_u64(), Some(16));
    assert_eq!(json["histogram"]["total"].as_u64(), Some(NODES as u64));
}

#[test]
fn spare_bytes_show_up_as_tail() {
    let ws = setup_region(&["--spare", "4096"]);
    let json = json_output(&ws, &["stats"], &ws.region);
    assert_eq!(json["tape"]["tail_bytes"].as_u64(), Some(4096));
    assert_eq!(json["tape"]["exact"].as_bool(), Some(false));
}

#[test]
fn verify_full_passes_on_fresh_region() {
    let ws = setup_region(&[]);
    let json = json_output(&ws, &["verify", "--level", "full"], &ws.region);
    assert_eq!(json["success"].as_bool(), Some(true));
    assert_eq!(json["counts"]["nodes_checked"].as_u64(), Some(NODES as u64));
    assert!(json["findings"]
        .as_array()
        .unwrap()
        .iter()
        .all(|finding| finding["severity"] != "error"));
}

#[test]
fn verify_has_no_self_referential_cross_check() {
    let ws = setup_region(&[]);
    let assert = nodetape(&ws)
        .args(["verify", "--cross-check"])
        .arg(&ws.region)
        .assert()
        .failure();
    assert!(stderr_of(assert).contains("--cross-check"));
}

#[test]
fn verify_warns_about_short_node_count() {
    let ws = setup_region(&[]);
    let json = json_output(&ws, &["--nodes", "40", "verify"], &ws.region);
    assert_eq!(json["success"].as_bool(), Some(true));
    assert_eq!(json["counts"]["nodes_checked"].as_u64(), Some(40));
    let findings = json["findings"].as_array().unwrap();
    assert!(findings
        .iter()
        .any(|finding| finding["severity"] == "warning"));
}

#[test]
fn histogram_counts_every_node() {
    let ws = setup_region(&[]);
    let json = json_output(&ws, &["histogram"], &ws.region);
    let buckets: u64 = json["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|count| count.as_u64().unwrap())
        .sum();
    let anomalous = json["anomalous"].as_u64().unwrap();
    assert_eq!(buckets + anomalous, NODES as u64);
    assert_eq!(json["total"].as_u64(), Some(NODES as u64));
}

#[test]
fn corrupt_dimension_field_fails_to_open() {
    let ws = setup_region(&[]);
    let mut bytes = fs::read(&ws.region).unwrap();
    // Dimension field of the first frame.
    bytes[72..76].copy_from_slice(&7u32.to_le_bytes());
    fs::write(&ws.region, &bytes).unwrap();

    let assert = nodetape(&ws).arg("stats").arg(&ws.region).assert().failure();
    assert!(stderr_of(assert).contains("format mismatch at offset 64"));
}

#[test]
fn missing_region_is_reported() {
    let ws = setup_region(&[]);
    let assert = nodetape(&ws)
        .arg("stats")
        .arg(ws.dir.path().join("absent.tape"))
        .assert()
        .failure();
    assert!(stderr_of(assert).contains("region file not found"));
}

#[test]
fn profile_supplies_region_path() {
    let ws = setup_region(&[]);
    fs::write(
        ws.config_path(),
        format!(
            "default_profile = \"local\"\n\n[profiles.local]\nregion = {:?}\ndimensions = 8\n",
            ws.region.display().to_string()
        ),
    )
    .unwrap();

    let output = nodetape(&ws)
        .args(["--format", "json", "stats"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["tape"]["nodes"].as_u64(), Some(NODES as u64));

    let assert = nodetape(&ws)
        .args(["--profile", "missing", "stats"])
        .assert()
        .failure();
    assert!(stderr_of(assert).contains("profile 'missing' not found"));
}
