//! The supervisor engine: a single-threaded poll loop that starts a
//! manifest's processes in dependency order, watches them for exit, restarts
//! or tears them down according to policy, and services operator commands.
use std::collections::HashMap;
use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tracing::{error, info, warn};

use crate::constants::{DEFAULT_TERMINATE_GRACE, POLL_LOOP_INTERVAL, READY_POLL_INTERVAL};
use crate::control::{self, ControlHandle, ControlRequest, ProcessSelector};
use crate::error::SupervisorError;
use crate::hooks::{self, HookPhase, LifecycleHook};
use crate::manifest::{ProcessManifest, ProcessSpec, ShutdownStrategy};
use crate::process::{ManagedProcess, ProcessStats, ProcessStatus};
use crate::registry::{PluginRegistry, ProcessBindings};
use crate::stats;
use crate::terminate::{self, ProcessTerminator};

/// The supervisor's own lifecycle, distinct from any single process's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// Not running; no processes managed.
    Idle,
    /// Poll loop active.
    Running,
    /// Tearing down; the poll loop will exit after the current tick.
    Stopping,
}

/// Starts, monitors, and tears down every process in a [`ProcessManifest`]
/// according to its dependencies, readiness gates, and shutdown strategies.
pub struct Supervisor {
    manifest: ProcessManifest,
    registry: PluginRegistry,
    bindings: HashMap<String, ProcessBindings>,
    terminator: Box<dyn ProcessTerminator>,
    running: Vec<ManagedProcess>,
    state: EngineState,
    poll_interval: Duration,
    commands_rx: std::sync::mpsc::Receiver<ControlRequest>,
    system: System,
}

impl Supervisor {
    /// Builds a supervisor for `manifest`, resolving every name it
    /// references against `registry`.
    ///
    /// Returns the supervisor alongside a [`ControlHandle`] cloneable out to
    /// other threads before [`Supervisor::run`] takes ownership of `self`.
    pub fn new(manifest: ProcessManifest, registry: PluginRegistry) -> (Self, ControlHandle) {
        let bindings = registry.bind(&manifest);
        let (handle, commands_rx) = control::channel();
        let supervisor = Self {
            manifest,
            registry,
            bindings,
            terminator: terminate::platform_terminator(),
            running: Vec::new(),
            state: EngineState::Idle,
            poll_interval: POLL_LOOP_INTERVAL,
            commands_rx,
            system: System::new(),
        };
        (supervisor, handle)
    }

    /// Overrides the poll loop's tick interval. Intended for tests; the
    /// default is [`POLL_LOOP_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts every process in dependency order, then runs the poll loop
    /// until an operator requests shutdown, a process's shutdown strategy is
    /// `shutdown_everything`, or every process has exited without being
    /// restarted.
    pub fn run(mut self) -> Result<(), SupervisorError> {
        self.start_all()?;
        self.state = EngineState::Running;
        loop {
            self.drain_commands();
            if !matches!(self.state, EngineState::Running) {
                break;
            }
            self.poll_tick();
            if matches!(self.state, EngineState::Stopping) {
                break;
            }
            std::thread::sleep(self.poll_interval);
        }
        self.shutdown_all();
        Ok(())
    }

    /// Starts every process in the manifest's (already topologically
    /// ordered) process list. On any failure, every process started so far
    /// in this call is torn down before the error is returned.
    fn start_all(&mut self) -> Result<(), SupervisorError> {
        if self.state != EngineState::Idle {
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.manifest.processes.is_empty() {
            return Err(SupervisorError::NoProcesses);
        }

        let specs: Vec<Arc<ProcessSpec>> = self
            .manifest
            .processes
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();

        for spec in specs {
            if let Err(err) = self.start_one(spec) {
                while let Some(mut managed) = self.running.pop() {
                    self.terminate_managed(&mut managed);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs the full start sequence for one process: `pre_start` hooks,
    /// spawn, CPU affinity, the readiness gate (if any), `post_start` hooks,
    /// then adds it to the running table.
    fn start_one(&mut self, spec: Arc<ProcessSpec>) -> Result<(), SupervisorError> {
        let pre_start_hooks = self.hooks_for(&spec.name, HookPhase::PreStart);
        let post_start_hooks = self.hooks_for(&spec.name, HookPhase::PostStart);
        let ready_probe = self.bindings.get(&spec.name).and_then(|b| b.ready.clone());

        hooks::dispatch(HookPhase::PreStart, &pre_start_hooks, &spec, None).map_err(|err| {
            SupervisorError::HookFailed {
                process: spec.name.clone(),
                reason: err.0,
            }
        })?;

        let mut managed = ManagedProcess::new(spec.clone());
        managed.status = ProcessStatus::Starting;
        let child = spawn_child(&spec).map_err(|source| SupervisorError::SpawnError {
            name: spec.name.clone(),
            source,
        })?;
        let pid = child.id();
        managed.pid = Some(pid);
        managed.child = Some(child);
        apply_affinity(&spec, pid);

        if let Some(strategy) = &spec.ready_strategy {
            match &ready_probe {
                Some(probe) => {
                    if !probe.wait(&spec, READY_POLL_INTERVAL) {
                        return Err(SupervisorError::ReadyTimeout(spec.name.clone()));
                    }
                }
                None => {
                    return Err(SupervisorError::MissingStrategy {
                        process: spec.name.clone(),
                        strategy: strategy.clone(),
                    });
                }
            }
        }

        managed.status = ProcessStatus::Ready;
        let _ = hooks::dispatch(HookPhase::PostStart, &post_start_hooks, &spec, managed.pid);
        managed.status = ProcessStatus::Running;
        info!(process = %spec.name, pid, "process running");
        self.running.push(managed);
        Ok(())
    }

    fn hooks_for(&self, name: &str, phase: HookPhase) -> Vec<Arc<dyn LifecycleHook>> {
        self.bindings
            .get(name)
            .and_then(|b| b.hooks.get(&phase))
            .cloned()
            .unwrap_or_default()
    }

    /// One tick of the poll loop: reap any process that exited since the
    /// last tick (applying its shutdown strategy), sample resource usage for
    /// everything still running, and fan samples out to stats handlers.
    fn poll_tick(&mut self) {
        let mut exited = Vec::new();
        for (index, managed) in self.running.iter_mut().enumerate() {
            if let Some(child) = managed.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => exited.push((index, status.code())),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(process = %managed.spec.name, %err, "failed to poll child status");
                    }
                }
            }
        }

        // Highest index first so removing a `do_not_restart` entry never
        // invalidates an index still pending in this batch.
        for (index, code) in exited.into_iter().rev() {
            self.handle_exit(index, code);
            if matches!(self.state, EngineState::Stopping) {
                return;
            }
        }

        self.sample_and_dispatch_stats();

        if self.running.is_empty() && matches!(self.state, EngineState::Running) {
            info!("every managed process has exited; stopping");
            self.state = EngineState::Stopping;
        }
    }

    fn handle_exit(&mut self, index: usize, code: Option<i32>) {
        let spec = self.running[index].spec.clone();
        self.running[index].return_code = code;
        self.running[index].status = ProcessStatus::Stopped;

        let on_shutdown_hooks = self.hooks_for(&spec.name, HookPhase::OnShutdown);
        let _ = hooks::dispatch(HookPhase::OnShutdown, &on_shutdown_hooks, &spec, None);

        match spec.shutdown_strategy {
            ShutdownStrategy::ShutdownEverything => {
                info!(process = %spec.name, "process exited; shutting down every managed process");
                self.state = EngineState::Stopping;
            }
            ShutdownStrategy::DoNotRestart => {
                info!(process = %spec.name, ?code, "process exited; will not be restarted");
                self.running.remove(index);
            }
            ShutdownStrategy::Restart => {
                info!(process = %spec.name, ?code, "process exited; restarting");
                let on_restart_hooks = self.hooks_for(&spec.name, HookPhase::OnRestart);
                let _ = hooks::dispatch(HookPhase::OnRestart, &on_restart_hooks, &spec, None);
                if let Err(err) = self.respawn_in_place(index, &spec) {
                    error!(process = %spec.name, %err, "failed to restart process after exit");
                    self.running[index].status = ProcessStatus::Failed;
                    self.running.remove(index);
                }
            }
        }
    }

    /// Replaces the OS process backing the running-table entry at `index`
    /// with a freshly spawned one. Used for both crash-restarts and
    /// operator-requested restarts; neither re-gates on readiness, since by
    /// the time a process has run once, waiting on the same probe again
    /// would only slow down recovery without adding information.
    fn respawn_in_place(&mut self, index: usize, spec: &Arc<ProcessSpec>) -> Result<(), SupervisorError> {
        let child = spawn_child(spec).map_err(|source| SupervisorError::SpawnError {
            name: spec.name.clone(),
            source,
        })?;
        let pid = child.id();
        apply_affinity(spec, pid);
        let managed = &mut self.running[index];
        managed.child = Some(child);
        managed.pid = Some(pid);
        managed.return_code = None;
        managed.status = ProcessStatus::Running;
        Ok(())
    }

    fn sample_and_dispatch_stats(&mut self) {
        for managed in &mut self.running {
            if let Some(pid) = managed.pid {
                if let Some(sample) = stats::sample(&mut self.system, pid) {
                    managed.runtime_info.record_cpu(sample.cpu_percent);
                    managed.runtime_info.record_memory(sample.memory_mb);
                }
            }
        }

        let mut by_handler: HashMap<&str, Vec<ProcessStats>> = HashMap::new();
        for managed in &self.running {
            for handler_name in &managed.spec.stat_handlers {
                by_handler
                    .entry(handler_name.as_str())
                    .or_default()
                    .push(managed.stats());
            }
        }
        for (name, stats_list) in by_handler {
            match self.registry.stats_handler_group(name) {
                Some(handlers) => {
                    for handler in handlers {
                        handler.handle(&stats_list);
                    }
                }
                None => warn!(handler = name, "referenced stats handler group is not registered"),
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(request) = self.commands_rx.try_recv() {
            match request {
                ControlRequest::StartProcess { name, reply } => {
                    let result = self.start_process_by_name(&name);
                    let _ = reply.send(result);
                }
                ControlRequest::StopProcess { name, reply } => {
                    let result = self.stop_process_by_name(&name);
                    let _ = reply.send(result);
                }
                ControlRequest::RestartProcesses { names, reply } => {
                    let result = self.restart_processes_by_name(names);
                    let _ = reply.send(result);
                }
                ControlRequest::GetRunningProcess { selector, reply } => {
                    let result = self.get_running_process(selector);
                    let _ = reply.send(result);
                }
                ControlRequest::Shutdown { reply } => {
                    self.state = EngineState::Stopping;
                    let _ = reply.send(());
                }
            }
        }
    }

    fn start_process_by_name(&mut self, name: &str) -> Result<(), SupervisorError> {
        if self.running.iter().any(|m| m.spec.name == name) {
            return Err(SupervisorError::ProcessAlreadyRunning(name.to_string()));
        }
        let spec = self
            .manifest
            .find(name)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        self.start_one(Arc::new(spec))
    }

    fn stop_process_by_name(&mut self, name: &str) -> Result<(), SupervisorError> {
        let index = self
            .running
            .iter()
            .position(|m| m.spec.name == name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        let mut managed = self.running.remove(index);
        self.terminate_managed(&mut managed);
        Ok(())
    }

    fn restart_processes_by_name(&mut self, names: Vec<String>) -> Result<(), SupervisorError> {
        for name in &names {
            if self.manifest.find(name).is_none() {
                return Err(SupervisorError::NotFound(name.clone()));
            }
        }
        for name in &names {
            match self.running.iter().position(|m| &m.spec.name == name) {
                Some(index) => {
                    let spec = self.running[index].spec.clone();
                    if let Some(pid) = self.running[index].pid {
                        self.terminator.terminate(pid, grace_for(&spec));
                    }
                    if let Some(mut child) = self.running[index].child.take() {
                        let _ = child.wait();
                    }
                    let on_restart_hooks = self.hooks_for(name, HookPhase::OnRestart);
                    let _ = hooks::dispatch(HookPhase::OnRestart, &on_restart_hooks, &spec, None);
                    self.respawn_in_place(index, &spec)?;
                }
                None => self.start_process_by_name(name)?,
            }
        }
        Ok(())
    }

    fn get_running_process(&self, selector: ProcessSelector) -> Option<ProcessStats> {
        match selector {
            ProcessSelector::Name(name) => {
                self.running.iter().find(|m| m.spec.name == name).map(|m| m.stats())
            }
            ProcessSelector::Pid(pid) => {
                self.running.iter().find(|m| m.pid == Some(pid)).map(|m| m.stats())
            }
        }
    }

    /// Sends the platform termination sequence to `managed`'s OS process (if
    /// any), reaps it, and runs its `on_shutdown` hooks.
    fn terminate_managed(&mut self, managed: &mut ManagedProcess) {
        managed.status = ProcessStatus::Stopping;
        if let Some(pid) = managed.pid {
            self.terminator.terminate(pid, grace_for(&managed.spec));
        }
        if let Some(mut child) = managed.child.take() {
            let _ = child.wait();
        }
        managed.status = ProcessStatus::Stopped;
        let on_shutdown_hooks = self.hooks_for(&managed.spec.name, HookPhase::OnShutdown);
        let _ = hooks::dispatch(HookPhase::OnShutdown, &on_shutdown_hooks, &managed.spec, None);
    }

    /// Terminates every running process, in reverse start order, and returns
    /// the engine to `Idle`.
    fn shutdown_all(&mut self) {
        while let Some(mut managed) = self.running.pop() {
            self.terminate_managed(&mut managed);
        }
        self.state = EngineState::Idle;
    }
}

fn grace_for(spec: &ProcessSpec) -> Duration {
    spec.timeout
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TERMINATE_GRACE)
}

fn spawn_child(spec: &ProcessSpec) -> io::Result<Child> {
    let mut command = Command::new(&spec.path);
    command.args(&spec.args);
    command.envs(&spec.env);
    if let Some(dir) = &spec.working_directory {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // A fresh process group (pgid == pid) lets the terminator signal the
        // whole tree this process spawns, not just itself.
        command.process_group(0);
    }
    command.spawn()
}

fn apply_affinity(spec: &ProcessSpec, pid: u32) {
    let Some(cpus) = &spec.affinity else {
        return;
    };

    #[cfg(target_os = "linux")]
    {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;
        let mut set = CpuSet::new();
        for &cpu in cpus {
            if set.set(cpu).is_err() {
                warn!(process = %spec.name, cpu, "cpu index rejected by CpuSet");
            }
        }
        if let Err(err) = sched_setaffinity(Pid::from_raw(pid as i32), &set) {
            warn!(process = %spec.name, %err, "failed to set cpu affinity");
        }
    }

    #[cfg(target_os = "macos")]
    {
        let _ = (spec, pid, cpus);
        warn!(process = %spec.name, "cpu affinity is not supported on macOS; ignoring");
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, SetProcessAffinityMask, PROCESS_QUERY_INFORMATION, PROCESS_SET_INFORMATION,
        };
        let mut mask: usize = 0;
        for &cpu in cpus {
            mask |= 1usize << cpu;
        }
        unsafe {
            let handle = OpenProcess(PROCESS_SET_INFORMATION | PROCESS_QUERY_INFORMATION, 0, pid);
            if handle.is_null() {
                warn!(process = %spec.name, "failed to open process handle for affinity");
                return;
            }
            if SetProcessAffinityMask(handle, mask) == 0 {
                warn!(process = %spec.name, "SetProcessAffinityMask failed");
            }
            CloseHandle(handle);
        }
    }
}
