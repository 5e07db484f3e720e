#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
base_file_size = 1048576
max_file_size = 1048576
max_indexes = 4
"#;

fn setup(lines: &[&str]) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let input = dir.path().join("input.jsonl");
    fs::write(&input, lines.join("\n")).expect("write input");
    let config = dir.path().join("config.toml");
    fs::write(&config, CONFIG).expect("write config");
    (dir, input, config)
}

fn load_json(config: &Path, extra: &[&str]) -> Value {
    let output = cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(config)
        .args(["--format", "json", "load"])
        .args(extra)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn load_reports_stats_and_verification_as_json() {
    let (_dir, input, config) = setup(&[r#"{"k": 1}"#, "", r#"{"k": 2}"#, r#"{"k": 2, "x": "y"}"#]);
    let json = load_json(
        &config,
        &["app.things", input.to_str().expect("utf8"), "--index", "k", "--stats", "--verify"],
    );

    assert_eq!(json["loads"][0]["inserted"], 3);
    assert_eq!(json["loads"][0]["blank_lines"], 1);
    assert_eq!(json["indexes"], serde_json::json!(["k_1"]));
    assert_eq!(json["metrics"]["records_inserted"].as_u64().map(|n| n >= 3), Some(true));
    assert_eq!(json["verify"]["success"], true);
    assert_eq!(json["stats"]["databases"][0]["file_bytes"], 1048576);

    let things = json["stats"]["collections"]
        .as_array()
        .expect("collections")
        .iter()
        .find(|c| c["ns"] == "app.things")
        .expect("app.things reported")
        .clone();
    assert_eq!(things["records"], 3);
    assert_eq!(things["indexes"][0]["name"], "k_1");
    assert_eq!(things["indexes"][0]["entries"], 3);
}

#[test]
fn capped_load_keeps_newest_documents() {
    let lines: Vec<String> = (0..10).map(|n| format!(r#"{{"n": {n}}}"#)).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let (_dir, input, config) = setup(&refs);
    let json = load_json(
        &config,
        &[
            "logs.recent",
            input.to_str().expect("utf8"),
            "--capped",
            "--size",
            "4096",
            "--max",
            "2",
            "--stats",
        ],
    );
    let recent = json["stats"]["collections"]
        .as_array()
        .expect("collections")
        .iter()
        .find(|c| c["ns"] == "logs.recent")
        .expect("logs.recent reported")
        .clone();
    assert_eq!(recent["capped"], true);
    assert_eq!(recent["max_records"], 2);
    assert_eq!(recent["records"], 2);
    assert_eq!(json["metrics"]["capped_evictions"], 8);
}

#[test]
fn text_output_summarizes_the_load() {
    let (_dir, input, config) = setup(&[r#"{"a": 1}"#, r#"{"a": 2}"#]);
    let output = cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .args(["load", "app.things"])
        .arg(&input)
        .arg("--verify")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Loaded 2 documents into app.things"), "{text}");
    assert!(text.contains("success=true"), "{text}");
}

#[test]
fn data_files_land_in_the_requested_directory() {
    let (dir, input, config) = setup(&[r#"{"a": 1}"#]);
    let data = dir.path().join("data");
    cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .arg("--dir")
        .arg(&data)
        .args(["load", "app.things"])
        .arg(&input)
        .assert()
        .success();
    assert_eq!(fs::metadata(data.join("app.0")).expect("data file").len(), 1048576);
}

#[test]
fn bad_input_fails_with_a_message() {
    let (_dir, input, config) = setup(&[r#"{"a": 1}"#, "not json"]);
    let output = cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .args(["load", "app.things"])
        .arg(&input)
        .assert()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("input.jsonl:2:"), "{stderr}");

    cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .args(["load", "nodot"])
        .arg(&input)
        .assert()
        .code(1);

    cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .args(["load", "app.things", "/nonexistent/input.jsonl"])
        .assert()
        .code(1);
}

#[test]
fn unknown_config_keys_are_rejected() {
    let (dir, input, _) = setup(&[r#"{"a": 1}"#]);
    let config = dir.path().join("bad.toml");
    fs::write(&config, "page_size = 4096\n").expect("write config");
    cargo_bin_cmd!("extentdb")
        .arg("--config")
        .arg(&config)
        .args(["load", "app.things"])
        .arg(&input)
        .assert()
        .code(1);
}
