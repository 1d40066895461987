//! Resource usage sampling and the stats handler fan-out.
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::process::ProcessStats;

/// A sink for periodic resource usage snapshots.
///
/// Registered under a name referenced by one or more processes'
/// `stat_handlers`; every process referencing the same name is sampled
/// together and handed to the handler in a single call, so a handler
/// monitoring a pair of cooperating processes sees both in one invocation.
pub trait StatsHandler: Send + Sync {
    /// Receives the latest samples for every process bound to this handler's
    /// name.
    fn handle(&self, stats: &[ProcessStats]);
}

impl<F> StatsHandler for F
where
    F: Fn(&[ProcessStats]) + Send + Sync,
{
    fn handle(&self, stats: &[ProcessStats]) {
        self(stats)
    }
}

/// A single CPU/memory sample for one OS process.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// CPU usage as a percentage (0-100 per core, so a busy 4-core process
    /// can read up to 400).
    pub cpu_percent: f32,
    /// Resident set size, in megabytes.
    pub memory_mb: f64,
}

/// Samples CPU and memory usage for a single OS process.
///
/// `system` is refreshed in place for just this pid before reading, matching
/// `sysinfo`'s recommended narrow-refresh usage: refreshing the whole
/// process table on every poll tick of every process would be wasteful.
///
/// Returns `None` if the process is no longer visible to the OS (it has
/// already exited and been reaped).
pub fn sample(system: &mut System, pid: u32) -> Option<Sample> {
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::everything(),
    );
    let process = system.process(sys_pid)?;
    Some(Sample {
        cpu_percent: process.cpu_usage(),
        memory_mb: (process.memory() * 1024) as f64 / (1024.0 * 1024.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sample_missing_process_returns_none() {
        let mut system = System::new();
        assert!(sample(&mut system, u32::MAX).is_none());
    }

    #[test]
    fn handler_closure_receives_all_scoped_stats() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler: Box<dyn StatsHandler> = Box::new(move |stats: &[ProcessStats]| {
            seen_clone.store(stats.len(), Ordering::SeqCst);
        });
        let stats = vec![
            ProcessStats {
                name: "a".into(),
                path: "/bin/true".into(),
                memory_usage_mb: 0.0,
                cpu_usage_percent: 0.0,
                max_memory_usage_mb: 0.0,
                max_cpu_usage_percent: 0.0,
                pid: Some(1),
                status: crate::process::ProcessStatus::Running,
            },
            ProcessStats {
                name: "b".into(),
                path: "/bin/true".into(),
                memory_usage_mb: 0.0,
                cpu_usage_percent: 0.0,
                max_memory_usage_mb: 0.0,
                max_cpu_usage_percent: 0.0,
                pid: Some(2),
                status: crate::process::ProcessStatus::Running,
            },
        ];
        handler.handle(&stats);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
