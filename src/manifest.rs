//! Declarative process manifests: parsing, validation, and dependency ordering.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_READY_TIMEOUT;
use crate::error::ManifestError;

/// What the supervisor should do when a process exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownStrategy {
    /// Respawn the process, skipping the readiness gate on the way back up.
    Restart,
    /// Leave the process stopped; do not respawn it.
    DoNotRestart,
    /// Tear down every other managed process and stop the supervisor.
    ShutdownEverything,
}

impl Default for ShutdownStrategy {
    fn default() -> Self {
        Self::Restart
    }
}

fn default_ready_timeout_sec() -> f64 {
    DEFAULT_READY_TIMEOUT.as_secs_f64()
}

/// A single process entry as declared in a manifest file.
///
/// This is the immutable, declarative half of a managed process. Runtime
/// state (pid, status, resource samples) lives in
/// [`crate::process::ManagedProcess`], which borrows from a shared
/// [`ProcessSpec`] rather than duplicating its fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessSpec {
    /// Unique name identifying this process within the manifest.
    pub name: String,

    /// Path to the executable. Resolved relative to the manifest's directory
    /// during validation unless already absolute, except for the literal
    /// PATH-lookup names `python` and `sleep`, which are left untouched.
    pub path: PathBuf,

    /// Arguments passed to the executable, in order. Entries that look like a
    /// relative path with a file extension are resolved the same way `path`
    /// is; everything else passes through unchanged.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged into the supervisor's own environment
    /// before spawning.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the spawned process. Resolved relative to the
    /// manifest's directory unless already absolute.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// What to do when the process exits on its own.
    #[serde(default)]
    pub shutdown_strategy: ShutdownStrategy,

    /// Names of other processes in this manifest that must reach `Ready`
    /// before this process is started.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Name of a registered [`crate::registry::ReadyProbe`] used to gate
    /// this process's transition from `Starting` to `Ready`. `None` means
    /// the process is considered ready as soon as it is spawned.
    #[serde(default)]
    pub ready_strategy: Option<String>,

    /// Upper bound, in seconds, that the readiness probe may spend waiting.
    #[serde(default = "default_ready_timeout_sec")]
    pub ready_timeout_sec: f64,

    /// Free-form parameters passed to the readiness probe (e.g. `port`,
    /// `path`).
    #[serde(default)]
    pub ready_params: HashMap<String, serde_json::Value>,

    /// Names of registered lifecycle hook groups applied to this process.
    #[serde(default)]
    pub lifecycle_hooks: Vec<String>,

    /// Names of registered stats handler groups applied to this process.
    #[serde(default)]
    pub stat_handlers: Vec<String>,

    /// CPU indices this process should be pinned to. `None` leaves affinity
    /// untouched.
    #[serde(default)]
    pub affinity: Option<Vec<usize>>,

    /// Grace period, in seconds, between a termination signal and the
    /// forceful follow-up. Falls back to
    /// [`crate::constants::DEFAULT_TERMINATE_GRACE`] when unset.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl ProcessSpec {
    /// The full argv used to spawn this process: executable path followed by
    /// its arguments.
    pub fn command(&self) -> Vec<String> {
        let mut command = vec![self.path.display().to_string()];
        command.extend(self.args.iter().cloned());
        command
    }
}

/// A parsed and validated collection of process declarations.
///
/// [`ProcessManifest::processes`] is stored in dependency-resolved
/// (topological) order once validation succeeds: a process never appears
/// before any of its dependencies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessManifest {
    /// The declared processes, in topological start order after validation.
    pub processes: Vec<ProcessSpec>,

    /// Name of a registered control-server plugin to expose the operator
    /// interface over, if any.
    #[serde(default)]
    pub control_server: Option<String>,

    /// Directory the manifest was loaded from, used to resolve relative
    /// paths. Not serialized.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ProcessManifest {
    /// Builds a manifest from already-constructed specs, without loading
    /// anything from disk. Relative paths are resolved against the current
    /// directory. Intended for tests and for embedders that build manifests
    /// programmatically rather than from a file.
    pub fn from_specs(processes: Vec<ProcessSpec>) -> Self {
        Self {
            processes,
            control_server: None,
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Loads and validates a manifest from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut manifest: ProcessManifest = serde_json::from_str(&contents)?;
        manifest.base_dir = base_dir_of(path);
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads and validates a manifest from a YAML file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut manifest: ProcessManifest = serde_yaml::from_str(&contents)?;
        manifest.base_dir = base_dir_of(path);
        manifest.validate()?;
        Ok(manifest)
    }

    /// Runs the full validation pipeline, reordering [`Self::processes`]
    /// into topological order as a side effect.
    ///
    /// Checks run in a fixed order so that the first structural problem in a
    /// manifest is always the one reported, matching the order a careful
    /// reader would check them in by hand:
    ///
    /// 1. names are unique
    /// 2. every dependency names a declared process
    /// 3. the dependency graph has no cycles (and is used to reorder `processes`)
    /// 4. every `ready_strategy` has the parameters it requires
    /// 5. every `affinity` index is within range of the host's CPU count
    /// 6. executable paths resolve to files that exist
    /// 7. working directories resolve to directories that exist
    pub fn validate(&mut self) -> Result<(), ManifestError> {
        if self.processes.is_empty() {
            return Err(ManifestError::Empty);
        }
        self.check_unique_names()?;
        self.check_dependencies_resolve()?;
        self.processes = self.start_order()?;
        self.check_ready_params()?;
        self.check_affinity()?;
        self.resolve_paths();
        self.check_executables_exist()?;
        self.check_working_directories_exist()?;
        Ok(())
    }

    fn check_unique_names(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for process in &self.processes {
            if !seen.insert(process.name.as_str()) {
                return Err(ManifestError::DuplicateName(process.name.clone()));
            }
        }
        Ok(())
    }

    fn check_dependencies_resolve(&self) -> Result<(), ManifestError> {
        let names: HashSet<&str> = self.processes.iter().map(|p| p.name.as_str()).collect();
        for process in &self.processes {
            for dependency in &process.dependencies {
                if !names.contains(dependency.as_str()) {
                    return Err(ManifestError::UnknownDependency {
                        process: process.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Computes a topological ordering of `processes` via depth-first
    /// search, tracking visiting/visited state so a cycle is reported as
    /// soon as it is walked into rather than looping forever.
    fn start_order(&self) -> Result<Vec<ProcessSpec>, ManifestError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Visited,
        }

        let by_name: HashMap<&str, &ProcessSpec> =
            self.processes.iter().map(|p| (p.name.as_str(), p)).collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut ordered: Vec<String> = Vec::with_capacity(self.processes.len());

        fn visit<'a>(
            name: &'a str,
            by_name: &HashMap<&'a str, &'a ProcessSpec>,
            marks: &mut HashMap<&'a str, Mark>,
            ordered: &mut Vec<String>,
        ) -> Result<(), ManifestError> {
            match marks.get(name) {
                Some(Mark::Visited) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(ManifestError::DependencyCycle {
                        a: name.to_string(),
                        b: name.to_string(),
                    });
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            let process = by_name[name];
            for dependency in &process.dependencies {
                if let Err(ManifestError::DependencyCycle { a, .. }) =
                    visit(dependency, by_name, marks, ordered)
                {
                    return Err(ManifestError::DependencyCycle {
                        a: name.to_string(),
                        b: a,
                    });
                }
            }
            marks.insert(name, Mark::Visited);
            ordered.push(name.to_string());
            Ok(())
        }

        for process in &self.processes {
            visit(&process.name, &by_name, &mut marks, &mut ordered)?;
        }

        Ok(ordered
            .into_iter()
            .map(|name| by_name[name.as_str()].clone())
            .collect())
    }

    fn check_ready_params(&self) -> Result<(), ManifestError> {
        for process in &self.processes {
            let Some(strategy) = process.ready_strategy.as_deref() else {
                continue;
            };
            match strategy {
                "file" | "pipe" => {
                    if !process.ready_params.contains_key("path") {
                        return Err(ManifestError::ReadyMissingPath(process.name.clone()));
                    }
                }
                "tcp" => {
                    if !process.ready_params.contains_key("port") {
                        return Err(ManifestError::ReadyMissingPort(process.name.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_affinity(&self) -> Result<(), ManifestError> {
        let cpu_count = num_cpus();
        for process in &self.processes {
            let Some(affinity) = &process.affinity else {
                continue;
            };
            for &cpu in affinity {
                if cpu >= cpu_count {
                    return Err(ManifestError::AffinityOutOfRange {
                        process: process.name.clone(),
                        cpu,
                        cpu_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves `path`, `args`, and `working_directory` relative to the
    /// manifest's own directory.
    ///
    /// `path` is left untouched when it is one of the literal PATH-lookup
    /// names (`python`, `sleep`) rather than a file on disk. Otherwise, once
    /// relative, it is joined to the manifest's directory and, if its final
    /// segment contains a `*`, expanded to the first directory entry that
    /// matches. Each entry in `args` that parses as a relative path with a
    /// file extension is rewritten the same way `path` is; everything else
    /// (flags, bare words, already-absolute paths) passes through unchanged.
    fn resolve_paths(&mut self) {
        let base_dir = self.base_dir.clone();
        for process in &mut self.processes {
            if !is_path_lookup_name(&process.path) {
                if process.path.is_relative() {
                    process.path = base_dir.join(&process.path);
                }
                if let Some(expanded) = expand_trailing_wildcard(&process.path) {
                    process.path = expanded;
                }
            }
            process.args = process
                .args
                .drain(..)
                .map(|arg| resolve_arg(&base_dir, arg))
                .collect();
            if let Some(dir) = &process.working_directory {
                if dir.is_relative() {
                    process.working_directory = Some(base_dir.join(dir));
                }
            }
        }
    }

    fn check_executables_exist(&self) -> Result<(), ManifestError> {
        for process in &self.processes {
            if is_path_lookup_name(&process.path) {
                continue;
            }
            if !process.path.is_file() {
                return Err(ManifestError::ExecutableNotFound {
                    process: process.name.clone(),
                    path: process.path.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_working_directories_exist(&self) -> Result<(), ManifestError> {
        for process in &self.processes {
            if let Some(dir) = &process.working_directory {
                if !dir.is_dir() {
                    return Err(ManifestError::WorkingDirectoryInvalid {
                        process: process.name.clone(),
                        path: dir.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Looks up a process declaration by name.
    pub fn find(&self, name: &str) -> Option<&ProcessSpec> {
        self.processes.iter().find(|p| p.name == name)
    }
}

fn base_dir_of(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Names left unresolved as PATH lookups rather than manifest-relative
/// files, matching the process-manifest format this crate's path resolution
/// was distilled from.
fn is_path_lookup_name(path: &Path) -> bool {
    matches!(path.to_str(), Some("python") | Some("sleep"))
}

fn resolve_arg(base_dir: &Path, arg: String) -> String {
    let arg_path = Path::new(&arg);
    if arg_path.extension().is_some() && arg_path.is_relative() {
        base_dir.join(arg_path).display().to_string()
    } else {
        arg
    }
}

/// Expands a single `*` in `path`'s final segment to the first matching
/// directory entry, in sorted order for determinism. Returns `None` when the
/// final segment has no wildcard, the parent directory can't be read, or
/// nothing matches (in which case the caller's existence check reports the
/// unresolved pattern as a missing executable).
fn expand_trailing_wildcard(path: &Path) -> Option<PathBuf> {
    let pattern = path.file_name()?.to_str()?;
    if !pattern.contains('*') {
        return None;
    }
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut matches: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| wildcard_matches(pattern, name))
        .collect();
    matches.sort();
    matches.into_iter().next().map(|name| dir.join(name))
}

/// Matches `candidate` against `pattern`, which contains at most one `*`.
fn wildcard_matches(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
        None => pattern == candidate,
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
