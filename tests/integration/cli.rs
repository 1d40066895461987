use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn write_manifest(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("warden.yaml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn validate_accepts_a_well_formed_manifest() {
    let dir = tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"
processes:
  - name: noop
    path: /bin/true
"#,
    );

    Command::cargo_bin("wardenctl")
        .unwrap()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(contains("is valid"));
}

#[test]
fn validate_rejects_an_unresolvable_dependency() {
    let dir = tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"
processes:
  - name: web
    path: /bin/true
    dependencies: [ghost]
"#,
    );

    Command::cargo_bin("wardenctl")
        .unwrap()
        .arg("validate")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(contains("ghost"));
}

#[test]
fn validate_rejects_a_missing_manifest_file() {
    Command::cargo_bin("wardenctl")
        .unwrap()
        .arg("validate")
        .arg("/no/such/manifest.yaml")
        .assert()
        .failure();
}

#[test]
fn start_runs_and_exits_once_every_process_stops() {
    let dir = tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"
processes:
  - name: noop
    path: /bin/true
    shutdown_strategy: do_not_restart
"#,
    );

    Command::cargo_bin("wardenctl")
        .unwrap()
        .arg("start")
        .arg(&manifest)
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .success();
}
