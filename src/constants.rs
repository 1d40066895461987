//! Constants and default values shared across the supervisor engine.
//!
//! Centralizes magic numbers and timing defaults so they have one home instead
//! of being sprinkled through the engine and manifest modules.

use std::time::Duration;

/// Default readiness timeout applied when a process does not specify
/// `ready_timeout_sec` in its manifest entry.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between successive polls of a readiness probe.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between successive ticks of the supervisor's main poll loop.
pub const POLL_LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Default grace period between SIGTERM (or `TerminateProcess`) and the
/// forceful follow-up signal when a process does not declare its own
/// `timeout`.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Interval used while polling a terminated process tree for exit.
pub const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);
