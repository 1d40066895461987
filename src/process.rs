//! Runtime process state: status, resource samples, and point-in-time snapshots.
use std::sync::Arc;

use serde::Serialize;

use crate::manifest::ProcessSpec;

/// Lifecycle state of a single managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Declared in the manifest but not yet acted upon.
    Initializing,
    /// Spawned, waiting on its readiness probe (or on nothing, if it has none).
    Starting,
    /// Readiness probe returned `true` (or the process has none).
    Ready,
    /// Steady state: observed alive on the most recent poll tick.
    Running,
    /// A termination signal has been sent; waiting for exit.
    Stopping,
    /// Exited and will not be restarted.
    Stopped,
    /// Exited and its shutdown strategy failed, or it failed to start.
    Failed,
}

/// Resource usage for a single process: the latest sample plus the running
/// maximum observed since it started.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RuntimeInfo {
    /// Most recently sampled resident memory, in megabytes.
    pub memory_usage_mb: f64,
    /// Most recently sampled CPU usage, as a percentage (0-100 per core).
    pub cpu_usage_percent: f32,
    /// Largest memory sample observed so far.
    pub max_memory_usage_mb: f64,
    /// Largest CPU sample observed so far.
    pub max_cpu_usage_percent: f32,
}

impl RuntimeInfo {
    /// Records a fresh memory sample, updating the running maximum.
    pub fn record_memory(&mut self, mb: f64) {
        self.memory_usage_mb = mb;
        if mb > self.max_memory_usage_mb {
            self.max_memory_usage_mb = mb;
        }
    }

    /// Records a fresh CPU sample, updating the running maximum.
    pub fn record_cpu(&mut self, percent: f32) {
        self.cpu_usage_percent = percent;
        if percent > self.max_cpu_usage_percent {
            self.max_cpu_usage_percent = percent;
        }
    }
}

/// A point-in-time snapshot of a running process, handed to stats handlers
/// and returned by the operator's `GetRunningProcess` query.
///
/// `name`, `path`, and the four resource fields are the schema's required
/// minimum; `pid` and `status` are carried alongside them since callers that
/// already have a snapshot in hand generally want to know whether it's still
/// running without a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    /// The process's declared name.
    pub name: String,
    /// The resolved executable path this process was spawned from.
    pub path: std::path::PathBuf,
    /// Most recently sampled resident memory, in megabytes.
    pub memory_usage_mb: f64,
    /// Most recently sampled CPU usage, as a percentage (0-100 per core).
    pub cpu_usage_percent: f32,
    /// Largest memory sample observed so far.
    pub max_memory_usage_mb: f64,
    /// Largest CPU sample observed so far.
    pub max_cpu_usage_percent: f32,
    /// OS process id, if currently running.
    pub pid: Option<u32>,
    /// Current lifecycle status.
    pub status: ProcessStatus,
}

/// A process entry in the supervisor's running table: the immutable spec it
/// was spawned from, plus whatever mutable state the engine has observed.
pub struct ManagedProcess {
    /// The manifest entry this process was spawned from.
    pub spec: Arc<ProcessSpec>,
    /// The OS child handle, `None` if the process is not currently spawned.
    pub child: Option<std::process::Child>,
    /// Current lifecycle status.
    pub status: ProcessStatus,
    /// OS process id, if currently running.
    pub pid: Option<u32>,
    /// Exit code from the most recent run, if any.
    pub return_code: Option<i32>,
    /// Resource usage samples.
    pub runtime_info: RuntimeInfo,
}

impl ManagedProcess {
    /// Creates a fresh, not-yet-spawned entry for `spec`.
    pub fn new(spec: Arc<ProcessSpec>) -> Self {
        Self {
            spec,
            child: None,
            status: ProcessStatus::Initializing,
            pid: None,
            return_code: None,
            runtime_info: RuntimeInfo::default(),
        }
    }

    /// Builds a [`ProcessStats`] snapshot of this process's current state.
    pub fn stats(&self) -> ProcessStats {
        ProcessStats {
            name: self.spec.name.clone(),
            path: self.spec.path.clone(),
            memory_usage_mb: self.runtime_info.memory_usage_mb,
            cpu_usage_percent: self.runtime_info.cpu_usage_percent,
            max_memory_usage_mb: self.runtime_info.max_memory_usage_mb,
            max_cpu_usage_percent: self.runtime_info.max_cpu_usage_percent,
            pid: self.pid,
            status: self.status,
        }
    }
}
