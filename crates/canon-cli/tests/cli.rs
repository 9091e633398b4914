// crates/canon-cli/tests/cli.rs
// ============================================================================
// Module: CLI Integration Tests
// Description: Exercises the compiled `canon` binary end to end.
// Purpose: Confirm `ingest` writes through to a real storage backend and
// that `run` starts its workers, without depending on canon-engine internals.
// Dependencies: canon-cli binary, canon-core, canon-store-sqlite, tempfile
// ============================================================================

use std::io::Read;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;

use canon_core::SetKind;
use canon_core::Storage;
use canon_core::set_name;

fn canon_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_canon"))
}

fn write_manifest(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("models.json");
    std::fs::write(
        &path,
        r#"[
            {"name": "Contact", "aggregation_tags": ["email"]}
        ]"#,
    )
    .unwrap();
    path
}

fn write_records(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("records.json");
    std::fs::write(
        &path,
        r#"[
            {"source_id": "row-1", "data": {"email": "a@x.com", "firstName": "Jo"}, "source": {"system": "crm"}}
        ]"#,
    )
    .unwrap();
    path
}

#[test]
fn ingest_writes_a_record_into_the_sqlite_intake_set() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let records = write_records(dir.path());
    let db_path = dir.path().join("canon.sqlite3");

    let output = Command::new(canon_bin())
        .args([
            "ingest",
            "--store",
            "sqlite",
            "--sqlite-path",
            db_path.to_str().unwrap(),
            "--models",
            manifest.to_str().unwrap(),
            "--model",
            "Contact",
            "--file",
            records.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let storage = canon_store_sqlite::SqliteStorage::open(&db_path).unwrap();
    let intake_set = set_name(&canon_core::ModelName::new("Contact"), SetKind::StageIntake);
    assert_eq!(storage.count(&intake_set).unwrap(), 1);
}

#[test]
fn ingest_rejects_a_model_absent_from_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let records = write_records(dir.path());
    let db_path = dir.path().join("canon.sqlite3");

    let output = Command::new(canon_bin())
        .args([
            "ingest",
            "--store",
            "sqlite",
            "--sqlite-path",
            db_path.to_str().unwrap(),
            "--models",
            manifest.to_str().unwrap(),
            "--model",
            "Nonexistent",
            "--file",
            records.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[test]
fn run_starts_the_workers_and_can_be_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let db_path = dir.path().join("canon.sqlite3");

    let mut child = Command::new(canon_bin())
        .args([
            "run",
            "--store",
            "sqlite",
            "--sqlite-path",
            db_path.to_str().unwrap(),
            "--models",
            manifest.to_str().unwrap(),
        ])
        .stderr(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(500));
    child.kill().unwrap();
    let mut stderr = String::new();
    child.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();
    assert!(stderr.contains("canon pipeline running"), "stderr: {stderr}");
}
