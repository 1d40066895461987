//! Error handling for warden.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a [`crate::manifest::ProcessManifest`].
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Error reading the manifest file from disk.
    #[error("failed to read manifest file: {0}")]
    Read(#[from] io::Error),

    /// Error parsing YAML manifest contents.
    #[error("invalid YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error parsing JSON manifest contents.
    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// Two processes declared the same name.
    #[error("duplicate process name: '{0}'")]
    DuplicateName(String),

    /// A `dependencies` entry names a process that was never declared.
    #[error("process '{process}' declares unknown dependency '{dependency}'")]
    UnknownDependency {
        /// The process with the dangling dependency.
        process: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("detected dependency cycle involving '{a}' and '{b}'")]
    DependencyCycle {
        /// One of the two processes adjacent to the detected cycle.
        a: String,
        /// The other process adjacent to the detected cycle.
        b: String,
    },

    /// `ready_strategy` is `file` or `pipe` but `ready_params.path` is missing.
    #[error("file and pipe ready strategies require a 'path' parameter: {0}")]
    ReadyMissingPath(String),

    /// `ready_strategy` is `tcp` but `ready_params.port` is missing.
    #[error("tcp ready strategy requires a 'port' parameter: {0}")]
    ReadyMissingPort(String),

    /// An `affinity` entry falls outside `[0, CPU_COUNT)`.
    #[error(
        "process '{process}' affinity cpu index {cpu} is out of range (host has {cpu_count} cpus)"
    )]
    AffinityOutOfRange {
        /// The offending process.
        process: String,
        /// The out-of-range CPU index.
        cpu: usize,
        /// The number of CPUs detected on the host.
        cpu_count: usize,
    },

    /// The resolved executable path does not exist.
    #[error("process '{process}' executable '{path}' does not exist")]
    ExecutableNotFound {
        /// The offending process.
        process: String,
        /// The resolved path that was not found.
        path: PathBuf,
    },

    /// The supplied working directory does not exist or is not a directory.
    #[error(
        "process '{process}' working directory '{path}' does not exist or is not a directory"
    )]
    WorkingDirectoryInvalid {
        /// The offending process.
        process: String,
        /// The invalid directory.
        path: PathBuf,
    },

    /// The manifest declared zero processes.
    #[error("manifest has no processes")]
    Empty,
}

/// Errors raised by the [`crate::supervisor::Supervisor`] engine.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The manifest failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// `Start` was called while the engine was already running.
    #[error("supervisor is already running")]
    AlreadyRunning,

    /// An operator command named a process absent from the manifest.
    #[error("process '{0}' not found")]
    NotFound(String),

    /// `StartProcess` was called for a process that is already running.
    #[error("process '{0}' is already running")]
    ProcessAlreadyRunning(String),

    /// The OS refused to create a child process.
    #[error("failed to spawn process '{name}': {source}")]
    SpawnError {
        /// The process that failed to spawn.
        name: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The readiness probe did not return `true` within `ready_timeout_sec`.
    #[error("process '{0}' did not become ready within its timeout")]
    ReadyTimeout(String),

    /// `ready_strategy` names a plugin that was never registered.
    #[error("ready strategy '{strategy}' is not registered for process '{process}'")]
    MissingStrategy {
        /// The process referencing the unbound strategy.
        process: String,
        /// The unresolved strategy name.
        strategy: String,
    },

    /// A `pre_start` hook failed, aborting startup of that process.
    #[error("pre_start hook failed for process '{process}': {reason}")]
    HookFailed {
        /// The process whose startup was aborted.
        process: String,
        /// The hook's failure message.
        reason: String,
    },

    /// `Start` was called against a manifest with no processes.
    #[error("no processes to start")]
    NoProcesses,
}

/// Failure reported by a single lifecycle hook invocation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);
