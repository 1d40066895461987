//! Shared fixtures for unit and integration tests.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::manifest::{ProcessManifest, ProcessSpec, ShutdownStrategy};

/// Global lock serializing tests that touch process-wide state (environment
/// variables, the current directory). Acquire before any test that does.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Acquires [`ENV_LOCK`], recovering from a poisoned lock left by a panicking
/// test rather than poisoning every test that follows it.
pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A `ProcessSpec` pointing at a real, harmless, short-lived executable
/// (`/bin/true` on Unix, a freshly written no-op `.bat` on Windows) so tests
/// can exercise validation and spawning without depending on test-specific
/// binaries.
pub fn sample_process_spec(name: &str) -> ProcessSpec {
    ProcessSpec {
        name: name.to_string(),
        path: default_executable(),
        args: Vec::new(),
        env: HashMap::new(),
        working_directory: None,
        shutdown_strategy: ShutdownStrategy::default(),
        dependencies: Vec::new(),
        ready_strategy: None,
        ready_timeout_sec: 1.0,
        ready_params: HashMap::new(),
        lifecycle_hooks: Vec::new(),
        stat_handlers: Vec::new(),
        affinity: None,
        timeout: None,
    }
}

#[cfg(unix)]
fn default_executable() -> PathBuf {
    PathBuf::from("/bin/true")
}

#[cfg(windows)]
fn default_executable() -> PathBuf {
    use std::io::Write;
    let dir = std::env::temp_dir();
    let path = dir.join("warden-test-noop.bat");
    if !path.exists() {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"@exit /b 0\r\n").unwrap();
    }
    path
}

/// Builds an already-validated manifest from `specs` without touching disk,
/// for tests that only care about engine behavior rather than manifest
/// loading.
pub fn sample_manifest(specs: Vec<ProcessSpec>) -> ProcessManifest {
    let mut manifest = ProcessManifest::from_specs(specs);
    manifest.validate().expect("sample manifest should validate");
    manifest
}
