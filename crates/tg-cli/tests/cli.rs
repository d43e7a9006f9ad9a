//! CLI command integration tests.
//! Each test uses a temp directory via TG_DATA_DIR for full isolation.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tg(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("tg").unwrap();
    cmd.env("TG_DATA_DIR", data_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Ingest one file and return the session id it was stored under.
fn ingest(data_dir: &TempDir, name: &str, text: &str) -> String {
    let path = data_dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    let output = tg(data_dir).arg("ingest").arg(&path).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    stdout.split('\t').next().unwrap().trim().to_string()
}

#[test]
fn test_ingest_then_reconstruct() {
    let dir = TempDir::new().unwrap();
    let text = "the quick brown fox jumps over the lazy dog.\nthe quick brown fox again.";
    let id = ingest(&dir, "fox.txt", text);
    assert_eq!(id.len(), 36);

    tg(&dir)
        .args(["reconstruct", &id])
        .assert()
        .success()
        .stdout(predicate::eq(text));
}

#[test]
fn test_second_document_uses_seeded_bank_and_still_reconstructs() {
    let dir = TempDir::new().unwrap();
    ingest(&dir, "a.txt", "abracadabra abracadabra abracadabra");
    let text = "abracadabra, said the magician: abracadabra!";
    let id = ingest(&dir, "b.txt", text);

    tg(&dir)
        .args(["reconstruct", &id])
        .assert()
        .success()
        .stdout(predicate::eq(text));
}

#[test]
fn test_stats_json_counts_sessions() {
    let dir = TempDir::new().unwrap();
    ingest(&dir, "one.txt", "hello hello hello world");
    ingest(&dir, "two.txt", "another document entirely");

    let output = tg(&dir).args(["stats", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["sessions"], 2);
    assert!(value["edges"].as_u64().unwrap() > 0);
    assert!(value["tokens"].as_u64().unwrap() > 0);
    assert_eq!(value["per_session"].as_array().unwrap().len(), 2);
    // each ingest seeds its bank from a fresh rank run
    assert_eq!(value["rank_runs"], 2);
    assert!(value["last_rank_iterations"].is_u64());
}

#[test]
fn test_stats_text_on_empty_store() {
    let dir = TempDir::new().unwrap();
    tg(&dir)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Edges:    0"))
        .stdout(predicate::str::contains("Ranked:   never"));
}

#[test]
fn test_top_prints_ranked_tokens() {
    let dir = TempDir::new().unwrap();
    ingest(&dir, "rep.txt", "ab ab ab ab ab ab ab ab ab ab");

    tg(&dir)
        .args(["top", "--percentile", "1.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0."));
}

#[test]
fn test_top_rejects_bad_percentile() {
    let dir = TempDir::new().unwrap();
    tg(&dir)
        .args(["top", "--percentile", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("percentile"));
}

#[test]
fn test_reconstruct_unknown_session_fails() {
    let dir = TempDir::new().unwrap();
    tg(&dir)
        .args(["reconstruct", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no stored edges"));
}

#[test]
fn test_bad_config_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tg.toml"), "[pipeline]\nbatch_size = 0\n").unwrap();
    tg(&dir)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_explicit_store_path_from_config() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nested").join("custom.db");
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, format!("[store]\npath = {:?}\n", db.display().to_string())).unwrap();

    let file = dir.path().join("doc.txt");
    std::fs::write(&file, "some words some words").unwrap();
    tg(&dir)
        .arg("--config")
        .arg(&config)
        .arg("ingest")
        .arg(&file)
        .assert()
        .success();
    assert!(db.exists());
}
