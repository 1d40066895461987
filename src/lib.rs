//! A declarative, dependency-aware supervisor for a fleet of child processes.

#![warn(unused_crate_dependencies)]
// ctrlc is only wired up in the demonstration binary (src/bin/main.rs).
use ctrlc as _;
// strum_macros::AsRefStr is derived in hooks.rs; the strum crate itself has
// no direct call site.
use strum as _;
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;
use tracing_subscriber as _;

/// Command-line interface for the `wardenctl` binary.
pub mod cli;

/// Manifest parsing and validation.
pub mod manifest;

/// Runtime process state and resource snapshots.
pub mod process;

/// Plugin registration: ready strategies, hook groups, stats handlers.
pub mod registry;

/// Readiness probes.
pub mod ready;

/// Lifecycle hook dispatch.
pub mod hooks;

/// Resource usage sampling and the stats handler fan-out.
pub mod stats;

/// Process-tree termination.
pub mod terminate;

/// The supervisor engine.
pub mod supervisor;

/// The operator command queue.
pub mod control;

/// Errors.
pub mod error;

/// Shared constants and defaults.
pub mod constants;

/// Test fixtures.
#[doc(hidden)]
pub mod test_utils;
