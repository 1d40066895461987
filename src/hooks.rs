//! Lifecycle hooks: named callbacks invoked at fixed points in a process's life.
use std::collections::HashMap;
use std::sync::Arc;

use strum_macros::AsRefStr;
use tracing::{error, warn};

use crate::error::HookError;
use crate::manifest::ProcessSpec;

/// The phase of a process's lifecycle a hook is invoked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HookPhase {
    /// Before the process is spawned. A failure here aborts startup of that
    /// process.
    PreStart,
    /// After the process is spawned and, if applicable, reports ready.
    PostStart,
    /// Just before the supervisor terminates the process.
    OnShutdown,
    /// Just before the supervisor respawns the process after an unplanned exit.
    OnRestart,
}

/// A single lifecycle callback.
///
/// Implemented for any `Fn(&ProcessSpec, Option<u32>) -> Result<(), HookError>`
/// closure, so plugin authors rarely need to name a concrete type.
pub trait LifecycleHook: Send + Sync {
    /// Invokes the hook for `process`, currently running as `pid` (`None`
    /// before the process has been spawned).
    fn call(&self, process: &ProcessSpec, pid: Option<u32>) -> Result<(), HookError>;
}

impl<F> LifecycleHook for F
where
    F: Fn(&ProcessSpec, Option<u32>) -> Result<(), HookError> + Send + Sync,
{
    fn call(&self, process: &ProcessSpec, pid: Option<u32>) -> Result<(), HookError> {
        self(process, pid)
    }
}

/// The set of hooks a single named hook group contributes, keyed by phase.
pub type HookGroup = HashMap<HookPhase, Vec<Arc<dyn LifecycleHook>>>;

/// Runs every hook registered for `phase` against `process`, in registration
/// order.
///
/// Only a `PreStart` failure is returned to the caller; failures at every
/// other phase are logged and the remaining hooks still run. This mirrors
/// the asymmetry in how a failed precondition differs from a failed
/// best-effort notification.
pub fn dispatch(
    phase: HookPhase,
    hooks: &[Arc<dyn LifecycleHook>],
    process: &ProcessSpec,
    pid: Option<u32>,
) -> Result<(), HookError> {
    for hook in hooks {
        if let Err(err) = hook.call(process, pid) {
            match phase {
                HookPhase::PreStart => {
                    error!(process = %process.name, phase = phase.as_ref(), error = %err, "hook failed");
                    return Err(err);
                }
                _ => {
                    warn!(process = %process.name, phase = phase.as_ref(), error = %err, "hook failed, continuing");
                }
            }
        }
    }
    Ok(())
}
