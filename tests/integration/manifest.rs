use std::fs;

use tempfile::tempdir;
use warden::error::ManifestError;
use warden::manifest::ProcessManifest;

#[test]
fn loads_a_yaml_manifest_in_dependency_order() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("warden.yaml"),
        r#"
processes:
  - name: web
    path: /bin/true
    dependencies: [cache, db]
  - name: db
    path: /bin/true
  - name: cache
    path: /bin/true
    dependencies: [db]
"#,
    )
    .unwrap();

    let manifest = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap();
    let names: Vec<&str> = manifest.processes.iter().map(|p| p.name.as_str()).collect();

    assert_eq!(names[0], "db");
    assert_eq!(names[2], "web");
    assert!(names.iter().position(|&n| n == "cache").unwrap() < 2);
}

#[test]
fn loads_a_json_manifest() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("warden.json"),
        r#"{"processes": [{"name": "app", "path": "/bin/true"}]}"#,
    )
    .unwrap();

    let manifest = ProcessManifest::load_json(dir.path().join("warden.json")).unwrap();
    assert_eq!(manifest.processes.len(), 1);
}

#[test]
fn rejects_a_two_process_dependency_cycle() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("warden.yaml"),
        r#"
processes:
  - name: a
    path: /bin/true
    dependencies: [b]
  - name: b
    path: /bin/true
    dependencies: [a]
"#,
    )
    .unwrap();

    let err = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap_err();
    assert!(matches!(err, ManifestError::DependencyCycle { .. }));
}

#[test]
fn rejects_tcp_ready_strategy_missing_port() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("warden.yaml"),
        r#"
processes:
  - name: app
    path: /bin/true
    ready_strategy: tcp
"#,
    )
    .unwrap();

    let err = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap_err();
    assert!(matches!(err, ManifestError::ReadyMissingPort(name) if name == "app"));
}

#[test]
fn rejects_affinity_index_beyond_host_cpu_count() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("warden.yaml"),
        r#"
processes:
  - name: app
    path: /bin/true
    affinity: [999999]
"#,
    )
    .unwrap();

    let err = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap_err();
    assert!(matches!(err, ManifestError::AffinityOutOfRange { .. }));
}

#[test]
fn relative_executable_paths_resolve_against_the_manifest_directory() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("app"), b"").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(dir.path().join("app")).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(dir.path().join("app"), perms).unwrap();
    }
    fs::write(
        dir.path().join("warden.yaml"),
        "processes:\n  - name: app\n    path: app\n",
    )
    .unwrap();

    let manifest = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap();
    assert_eq!(manifest.processes[0].path, dir.path().join("app"));
}

#[test]
fn a_trailing_wildcard_path_resolves_to_the_first_matching_file() {
    let dir = tempdir().unwrap();
    for name in ["app-1.0", "app-2.0"] {
        fs::write(dir.path().join(name), b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(dir.path().join(name)).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(dir.path().join(name), perms).unwrap();
        }
    }
    fs::write(
        dir.path().join("warden.yaml"),
        "processes:\n  - name: app\n    path: \"app-*\"\n",
    )
    .unwrap();

    let manifest = ProcessManifest::load_yaml(dir.path().join("warden.yaml")).unwrap();
    assert_eq!(manifest.processes[0].path, dir.path().join("app-1.0"));
}
