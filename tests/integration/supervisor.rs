use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use warden::control::ProcessSelector;
use warden::hooks::HookPhase;
use warden::manifest::{ProcessManifest, ProcessSpec, ShutdownStrategy};
use warden::process::ProcessStatus;
use warden::ready::ReadyProbe;
use warden::registry::{Plugin, PluginRegistry};
use warden::stats::StatsHandler;
use warden::supervisor::Supervisor;

fn noop_spec(name: &str) -> ProcessSpec {
    ProcessSpec {
        name: name.to_string(),
        path: "/bin/true".into(),
        args: Vec::new(),
        env: HashMap::new(),
        working_directory: None,
        shutdown_strategy: ShutdownStrategy::default(),
        dependencies: Vec::new(),
        ready_strategy: None,
        ready_timeout_sec: 2.0,
        ready_params: HashMap::new(),
        lifecycle_hooks: Vec::new(),
        stat_handlers: Vec::new(),
        affinity: None,
        timeout: None,
    }
}

/// A readiness probe that always reports ready immediately, used to exercise
/// the readiness-gate wiring without depending on timing.
struct AlwaysReady;

impl ReadyProbe for AlwaysReady {
    fn name(&self) -> &str {
        "always-ready"
    }

    fn wait(&self, _process: &ProcessSpec, _poll_interval: Duration) -> bool {
        true
    }
}

struct AlwaysReadyPlugin;

impl Plugin for AlwaysReadyPlugin {
    fn name(&self) -> &str {
        "always-ready"
    }

    fn ready_strategies(&self) -> HashMap<String, Arc<dyn ReadyProbe>> {
        let mut map: HashMap<String, Arc<dyn ReadyProbe>> = HashMap::new();
        map.insert("always-ready".to_string(), Arc::new(AlwaysReady));
        map
    }
}

#[test]
fn starts_processes_in_dependency_order_and_shuts_down_cleanly() {
    let mut web = noop_spec("web");
    web.dependencies = vec!["db".to_string()];
    let mut manifest = ProcessManifest::from_specs(vec![web, noop_spec("db")]);
    manifest.validate().unwrap();

    let (supervisor, handle) = Supervisor::new(manifest, PluginRegistry::new());
    let runner = std::thread::spawn(move || supervisor.run());

    // Give the poll loop a moment to start, then ask it to shut down.
    std::thread::sleep(Duration::from_millis(100));
    handle.shutdown();

    runner.join().unwrap().unwrap();
}

#[test]
fn readiness_gate_blocks_until_probe_reports_ready() {
    let mut registry = PluginRegistry::new();
    registry.register(&AlwaysReadyPlugin);

    let mut gated = noop_spec("gated");
    gated.ready_strategy = Some("always-ready".to_string());
    let mut manifest = ProcessManifest::from_specs(vec![gated]);
    manifest.validate().unwrap();

    let (supervisor, handle) = Supervisor::new(manifest, registry);
    let runner = std::thread::spawn(move || supervisor.run());
    std::thread::sleep(Duration::from_millis(100));

    let snapshot = handle.get_running_process(ProcessSelector::Name("gated".to_string()));
    assert!(snapshot.is_some());
    assert_eq!(snapshot.unwrap().status, ProcessStatus::Running);

    handle.shutdown();
    runner.join().unwrap().unwrap();
}

#[test]
fn operator_restart_processes_is_atomic_across_unknown_names() {
    let mut manifest = ProcessManifest::from_specs(vec![noop_spec("only")]);
    manifest.validate().unwrap();
    let (supervisor, handle) = Supervisor::new(manifest, PluginRegistry::new());
    let runner = std::thread::spawn(move || supervisor.run());
    std::thread::sleep(Duration::from_millis(100));

    let result = handle.restart_processes(vec!["only".to_string(), "ghost".to_string()]);
    assert!(result.is_err());

    // "only" must still be running; the failed call touched nothing.
    let snapshot = handle.get_running_process(ProcessSelector::Name("only".to_string()));
    assert!(snapshot.is_some());

    handle.shutdown();
    runner.join().unwrap().unwrap();
}

struct RecordingHandler(Arc<Mutex<Vec<usize>>>);

impl StatsHandler for RecordingHandler {
    fn handle(&self, stats: &[warden::process::ProcessStats]) {
        self.0.lock().unwrap().push(stats.len());
    }
}

struct RecordingPlugin(Arc<Mutex<Vec<usize>>>);

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    fn stats_handlers(&self) -> HashMap<String, Vec<Arc<dyn StatsHandler>>> {
        let mut map: HashMap<String, Vec<Arc<dyn StatsHandler>>> = HashMap::new();
        map.insert(
            "shared".to_string(),
            vec![Arc::new(RecordingHandler(self.0.clone()))],
        );
        map
    }
}

#[test]
fn a_stats_handler_shared_by_two_processes_is_called_with_both() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    registry.register(&RecordingPlugin(seen.clone()));

    let mut a = noop_spec("a");
    a.stat_handlers = vec!["shared".to_string()];
    let mut b = noop_spec("b");
    b.stat_handlers = vec!["shared".to_string()];
    let mut manifest = ProcessManifest::from_specs(vec![a, b]);
    manifest.validate().unwrap();

    let (supervisor, handle) = Supervisor::new(manifest, registry);
    let runner = std::thread::spawn(move || supervisor.run());
    std::thread::sleep(Duration::from_millis(250));
    handle.shutdown();
    runner.join().unwrap().unwrap();

    let calls = seen.lock().unwrap();
    assert!(calls.iter().any(|&count| count == 2));
}

#[test]
fn pre_start_hook_failure_aborts_startup() {
    struct FailingHookPlugin;
    impl Plugin for FailingHookPlugin {
        fn name(&self) -> &str {
            "failing-hook"
        }

        fn lifecycle_hooks(
            &self,
        ) -> HashMap<String, warden::hooks::HookGroup> {
            let mut group: warden::hooks::HookGroup = HashMap::new();
            group.insert(
                HookPhase::PreStart,
                vec![Arc::new(|_: &ProcessSpec, _: Option<u32>| {
                    Err(warden::error::HookError("refused".to_string()))
                })],
            );
            let mut map = HashMap::new();
            map.insert("refuse".to_string(), group);
            map
        }
    }

    let mut registry = PluginRegistry::new();
    registry.register(&FailingHookPlugin);

    let mut doomed = noop_spec("doomed");
    doomed.lifecycle_hooks = vec!["refuse".to_string()];
    let mut manifest = ProcessManifest::from_specs(vec![doomed]);
    manifest.validate().unwrap();

    let (supervisor, _handle) = Supervisor::new(manifest, registry);
    let result = supervisor.run();
    assert!(result.is_err());
}
