//! Process-tree termination: signal the whole tree spawned by a process,
//! escalating to a forceful kill if it does not exit within its grace period.
use std::time::Duration;

use tracing::warn;

use crate::constants::TERMINATE_POLL_INTERVAL;

/// Terminates a process (and, where the platform allows it cheaply, its
/// descendants) and waits up to `grace` for it to exit before escalating.
///
/// Errors are logged, not propagated: by the time shutdown runs there is
/// nothing a caller could usefully do differently with a returned error, and
/// the supervisor must continue tearing down the rest of the tree regardless.
pub trait ProcessTerminator: Send + Sync {
    /// Terminates the process tree rooted at `pid`.
    fn terminate(&self, pid: u32, grace: Duration);
}

/// Returns the terminator appropriate for the host platform.
pub fn platform_terminator() -> Box<dyn ProcessTerminator> {
    #[cfg(unix)]
    {
        Box::new(posix::PosixTerminator)
    }
    #[cfg(windows)]
    {
        Box::new(windows::WindowsTerminator)
    }
}

#[cfg(unix)]
mod posix {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    use std::time::Instant;

    pub struct PosixTerminator;

    impl ProcessTerminator for PosixTerminator {
        /// Sends `SIGTERM` to the process group, polls for exit, then sends
        /// `SIGKILL` to whatever is left once `grace` elapses.
        ///
        /// Relies on the child having been spawned into its own process
        /// group (pgid equal to its pid) so that signalling the group reaches
        /// any of its own children too, not just the immediate process.
        fn terminate(&self, pid: u32, grace: Duration) {
            let target = Pid::from_raw(pid as i32);
            if let Err(err) = signal::killpg(target, Signal::SIGTERM) {
                if err != Errno::ESRCH {
                    warn!(pid, %err, "failed to send SIGTERM to process group");
                }
                return;
            }

            let deadline = Instant::now() + grace;
            loop {
                match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {}
                    Ok(_) => return,
                    Err(Errno::ECHILD) => return,
                    Err(err) => {
                        warn!(pid, %err, "waitpid failed while waiting for graceful exit");
                        return;
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(TERMINATE_POLL_INTERVAL);
            }

            if let Err(err) = signal::killpg(target, Signal::SIGKILL) {
                if err != Errno::ESRCH {
                    warn!(pid, %err, "failed to send SIGKILL to process group");
                }
                return;
            }
            match waitpid(target, None) {
                Ok(_) | Err(Errno::ECHILD) => {}
                Err(err) => warn!(pid, %err, "waitpid failed after SIGKILL"),
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use sysinfo::{Pid, System};
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, TerminateProcess, PROCESS_TERMINATE,
    };

    pub struct WindowsTerminator;

    impl ProcessTerminator for WindowsTerminator {
        /// Enumerates the process tree rooted at `pid` bottom-up using
        /// `sysinfo`'s parent links, then calls `TerminateProcess` on every
        /// descendant before the root. Windows has no group-signal
        /// equivalent to `SIGTERM`, so there is no graceful phase here:
        /// `grace` is honored only as the poll budget for confirming exit.
        fn terminate(&self, pid: u32, grace: Duration) {
            let mut system = System::new_all();
            system.refresh_all();

            let root = Pid::from_u32(pid);
            let mut tree = vec![root];
            let mut frontier = vec![root];
            while let Some(current) = frontier.pop() {
                for (candidate_pid, process) in system.processes() {
                    if process.parent() == Some(current) && !tree.contains(candidate_pid) {
                        tree.push(*candidate_pid);
                        frontier.push(*candidate_pid);
                    }
                }
            }
            // Children were discovered breadth-first from the root; reverse
            // so we terminate leaves before their ancestors.
            tree.reverse();

            for target in tree {
                terminate_one(target.as_u32());
            }

            let deadline = std::time::Instant::now() + grace;
            while std::time::Instant::now() < deadline {
                system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[root]), true);
                if system.process(root).is_none() {
                    return;
                }
                std::thread::sleep(super::TERMINATE_POLL_INTERVAL);
            }
        }
    }

    fn terminate_one(pid: u32) {
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                warn!(pid, "failed to open process handle for termination");
                return;
            }
            if TerminateProcess(handle, 1) == 0 {
                warn!(pid, "TerminateProcess failed");
            }
            CloseHandle(handle);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    #[test]
    fn terminates_a_sleeping_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        platform_terminator().terminate(pid, Duration::from_millis(200));
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
