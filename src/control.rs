//! The operator command queue: a single-consumer channel the supervisor
//! drains at the start of every poll tick, giving external callers a way to
//! start, stop, and restart processes without touching the engine directly.
use std::sync::mpsc;

use crate::error::SupervisorError;
use crate::process::ProcessStats;

/// How a caller identifies a process to [`ControlHandle::get_running_process`].
#[derive(Debug, Clone)]
pub enum ProcessSelector {
    /// By its manifest name.
    Name(String),
    /// By its current OS process id.
    Pid(u32),
}

/// A request enqueued by a [`ControlHandle`] for the supervisor's poll loop
/// to service.
pub(crate) enum ControlRequest {
    StartProcess {
        name: String,
        reply: mpsc::Sender<Result<(), SupervisorError>>,
    },
    StopProcess {
        name: String,
        reply: mpsc::Sender<Result<(), SupervisorError>>,
    },
    RestartProcesses {
        names: Vec<String>,
        reply: mpsc::Sender<Result<(), SupervisorError>>,
    },
    GetRunningProcess {
        selector: ProcessSelector,
        reply: mpsc::Sender<Option<ProcessStats>>,
    },
    Shutdown {
        reply: mpsc::Sender<()>,
    },
}

/// Creates a linked `(ControlHandle, Receiver)` pair: the handle is cloned
/// out to callers, the receiver is owned and drained by the supervisor's
/// poll loop.
pub(crate) fn channel() -> (ControlHandle, mpsc::Receiver<ControlRequest>) {
    let (sender, receiver) = mpsc::channel();
    (ControlHandle { sender }, receiver)
}

/// A cloneable, thread-safe handle for driving a running [`crate::supervisor::Supervisor`].
///
/// Every method blocks the calling thread until the poll loop services the
/// request on its next tick and replies; none of them touch engine state
/// directly, so callers never need their own synchronization.
#[derive(Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    /// Starts a process that is not currently running.
    pub fn start_process(&self, name: impl Into<String>) -> Result<(), SupervisorError> {
        let (reply, rx) = mpsc::channel();
        self.send(ControlRequest::StartProcess {
            name: name.into(),
            reply,
        });
        self.recv(rx)
    }

    /// Stops a running process. It will not be restarted.
    pub fn stop_process(&self, name: impl Into<String>) -> Result<(), SupervisorError> {
        let (reply, rx) = mpsc::channel();
        self.send(ControlRequest::StopProcess {
            name: name.into(),
            reply,
        });
        self.recv(rx)
    }

    /// Restarts every named process atomically: if any name is unknown, none
    /// of them are touched.
    pub fn restart_processes(&self, names: Vec<String>) -> Result<(), SupervisorError> {
        let (reply, rx) = mpsc::channel();
        self.send(ControlRequest::RestartProcesses { names, reply });
        self.recv(rx)
    }

    /// Returns a snapshot of a single process's current state, if it is
    /// known to the supervisor.
    pub fn get_running_process(&self, selector: ProcessSelector) -> Option<ProcessStats> {
        let (reply, rx) = mpsc::channel();
        self.send(ControlRequest::GetRunningProcess { selector, reply });
        rx.recv().ok().flatten()
    }

    /// Requests a clean shutdown of every managed process and the
    /// supervisor itself. Blocks until shutdown completes.
    pub fn shutdown(&self) {
        let (reply, rx) = mpsc::channel();
        self.send(ControlRequest::Shutdown { reply });
        let _ = rx.recv();
    }

    fn send(&self, request: ControlRequest) {
        // The supervisor's poll loop owns the receiver for as long as it is
        // running; a send error means the loop has already exited, which
        // callers observe as their reply channel closing instead.
        let _ = self.sender.send(request);
    }

    fn recv(&self, rx: mpsc::Receiver<Result<(), SupervisorError>>) -> Result<(), SupervisorError> {
        rx.recv().unwrap_or(Err(SupervisorError::NotFound(
            "supervisor is not running".to_string(),
        )))
    }
}
