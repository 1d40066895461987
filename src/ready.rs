//! Readiness probes: pluggable strategies for deciding when a freshly spawned
//! process has finished starting up.
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::manifest::ProcessSpec;

/// A strategy for deciding whether a just-spawned process is ready to serve
/// traffic.
///
/// Implementations are expected to internally loop, sleeping `poll_interval`
/// between attempts, until either they observe readiness or
/// `process.ready_timeout_sec` elapses.
pub trait ReadyProbe: Send + Sync {
    /// The name this probe is registered under (e.g. `"tcp"`).
    fn name(&self) -> &str;

    /// Blocks until `process` is ready or its readiness timeout elapses,
    /// returning whether it became ready in time.
    fn wait(&self, process: &ProcessSpec, poll_interval: Duration) -> bool;
}

fn deadline_for(process: &ProcessSpec) -> Instant {
    Instant::now() + Duration::from_secs_f64(process.ready_timeout_sec.max(0.0))
}

/// Polls a TCP port on `localhost` until a connection succeeds.
///
/// Mirrors the original strategy this crate's readiness model was distilled
/// from: each attempt uses a one-second connect timeout, and attempts repeat
/// until the process's overall readiness timeout elapses.
#[derive(Debug, Default)]
pub struct TcpProbe;

impl ReadyProbe for TcpProbe {
    fn name(&self) -> &str {
        "tcp"
    }

    fn wait(&self, process: &ProcessSpec, poll_interval: Duration) -> bool {
        let Some(port) = process
            .ready_params
            .get("port")
            .and_then(|v| v.as_u64())
            .map(|p| p as u16)
        else {
            return false;
        };
        let addr = format!("127.0.0.1:{port}");
        let deadline = deadline_for(process);
        loop {
            let Ok(socket_addr) = addr.parse() else {
                return false;
            };
            if TcpStream::connect_timeout(&socket_addr, Duration::from_secs(1)).is_ok() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll_interval);
        }
    }
}

/// Polls for the existence of a file at `ready_params.path`.
#[derive(Debug, Default)]
pub struct FileProbe;

impl ReadyProbe for FileProbe {
    fn name(&self) -> &str {
        "file"
    }

    fn wait(&self, process: &ProcessSpec, poll_interval: Duration) -> bool {
        let Some(path) = process.ready_params.get("path").and_then(|v| v.as_str()) else {
            return false;
        };
        let path = Path::new(path);
        let deadline = deadline_for(process);
        loop {
            if path.exists() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll_interval);
        }
    }
}

/// Waits on a named pipe at `ready_params.path`: a POSIX FIFO on Unix, or a
/// Windows named pipe instance on Windows.
///
/// The probe owns the pipe's lifecycle: it creates the pipe if nothing is
/// listening there yet (mirroring the service side of the handshake — the
/// spawned process only opens the pipe for writing once it already exists),
/// attempts a non-blocking read each poll, and removes the pipe once a
/// message has actually been read. A pipe that exists but has had nothing
/// written to it does not count as ready.
#[derive(Debug, Default)]
pub struct PipeProbe;

impl ReadyProbe for PipeProbe {
    fn name(&self) -> &str {
        "pipe"
    }

    fn wait(&self, process: &ProcessSpec, poll_interval: Duration) -> bool {
        let Some(path) = process.ready_params.get("path").and_then(|v| v.as_str()) else {
            return false;
        };
        let path = Path::new(path);
        platform::wait_for_pipe(path, process, poll_interval)
    }
}

#[cfg(unix)]
mod platform {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use nix::fcntl::{open, OFlag};
    use nix::sys::stat::Mode;
    use nix::unistd::{close, mkfifo, read};

    use crate::manifest::ProcessSpec;

    pub fn wait_for_pipe(path: &Path, process: &ProcessSpec, poll_interval: Duration) -> bool {
        if !path.exists() && mkfifo(path, Mode::from_bits_truncate(0o600)).is_err() {
            return false;
        }
        let deadline = super::deadline_for(process);
        loop {
            if try_read(path) {
                let _ = std::fs::remove_file(path);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn try_read(path: &Path) -> bool {
        let Ok(fd) = open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty()) else {
            return false;
        };
        let mut buf = [0u8; 256];
        let got_data = matches!(read(fd, &mut buf), Ok(n) if n > 0);
        let _ = close(fd);
        got_data
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_PIPE_LISTENING, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::ReadFile;
    use windows_sys::Win32::System::Pipes::{
        ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_ACCESS_INBOUND,
        PIPE_NOWAIT, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE,
    };

    use crate::manifest::ProcessSpec;

    pub fn wait_for_pipe(path: &Path, process: &ProcessSpec, poll_interval: Duration) -> bool {
        let Some(handle) = create(path) else {
            return false;
        };
        let deadline = super::deadline_for(process);
        loop {
            if try_read(handle) {
                cleanup(handle);
                return true;
            }
            if Instant::now() >= deadline {
                cleanup(handle);
                return false;
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn wide_name(path: &Path) -> Vec<u16> {
        let name = path.to_string_lossy();
        let full = if name.starts_with(r"\\.\pipe\") {
            name.to_string()
        } else {
            format!(r"\\.\pipe\{name}")
        };
        OsStr::new(&full)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    fn create(path: &Path) -> Option<HANDLE> {
        let wide = wide_name(path);
        unsafe {
            let handle = CreateNamedPipeW(
                wide.as_ptr(),
                PIPE_ACCESS_INBOUND,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_NOWAIT,
                1,
                0,
                256,
                0,
                std::ptr::null_mut(),
            );
            if handle == INVALID_HANDLE_VALUE {
                None
            } else {
                Some(handle)
            }
        }
    }

    fn try_read(handle: HANDLE) -> bool {
        unsafe {
            let connected =
                ConnectNamedPipe(handle, std::ptr::null_mut()) != 0 || GetLastError() == ERROR_PIPE_LISTENING;
            if !connected {
                return false;
            }
            let mut buf = [0u8; 256];
            let mut read_bytes: u32 = 0;
            ReadFile(
                handle,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                &mut read_bytes,
                std::ptr::null_mut(),
            ) != 0
                && read_bytes > 0
        }
    }

    fn cleanup(handle: HANDLE) {
        unsafe {
            DisconnectNamedPipe(handle);
            CloseHandle(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::TcpListener;

    fn spec_with_params(params: HashMap<String, serde_json::Value>) -> ProcessSpec {
        let mut spec = crate::test_utils::sample_process_spec("demo");
        spec.ready_params = params;
        spec.ready_timeout_sec = 1.0;
        spec
    }

    #[test]
    fn tcp_probe_succeeds_once_port_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut params = HashMap::new();
        params.insert("port".to_string(), serde_json::json!(port));
        let spec = spec_with_params(params);
        assert!(TcpProbe.wait(&spec, Duration::from_millis(10)));
    }

    #[test]
    fn tcp_probe_times_out_without_listener() {
        let mut params = HashMap::new();
        params.insert("port".to_string(), serde_json::json!(1u16));
        let spec = spec_with_params(params);
        assert!(!TcpProbe.wait(&spec, Duration::from_millis(10)));
    }

    #[test]
    fn file_probe_detects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("ready");
        std::fs::write(&file_path, b"ok").unwrap();
        let mut params = HashMap::new();
        params.insert(
            "path".to_string(),
            serde_json::json!(file_path.to_string_lossy()),
        );
        let spec = spec_with_params(params);
        assert!(FileProbe.wait(&spec, Duration::from_millis(10)));
    }

    #[test]
    fn file_probe_times_out_when_missing() {
        let mut params = HashMap::new();
        params.insert("path".to_string(), serde_json::json!("/no/such/file"));
        let spec = spec_with_params(params);
        assert!(!FileProbe.wait(&spec, Duration::from_millis(10)));
    }

    #[cfg(unix)]
    #[test]
    fn pipe_probe_succeeds_once_a_writer_delivers_a_message() {
        let dir = tempfile::tempdir().unwrap();
        let pipe_path = dir.path().join("ready.pipe");
        let mut params = HashMap::new();
        params.insert(
            "path".to_string(),
            serde_json::json!(pipe_path.to_string_lossy()),
        );
        let mut spec = spec_with_params(params);
        spec.ready_timeout_sec = 2.0;

        let writer_path = pipe_path.clone();
        let writer = std::thread::spawn(move || {
            use std::io::Write;
            // Wait for the probe to create the FIFO before opening it for
            // writing — a blocking open on a FIFO with no reader present
            // would otherwise never return.
            while !writer_path.exists() {
                std::thread::sleep(Duration::from_millis(5));
            }
            let mut fifo = std::fs::OpenOptions::new()
                .write(true)
                .open(&writer_path)
                .unwrap();
            fifo.write_all(b"ready\n").unwrap();
        });

        assert!(PipeProbe.wait(&spec, Duration::from_millis(10)));
        writer.join().unwrap();
        assert!(!pipe_path.exists(), "probe should remove the FIFO on success");
    }

    #[cfg(unix)]
    #[test]
    fn pipe_probe_times_out_when_nothing_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let pipe_path = dir.path().join("ready.pipe");
        let mut params = HashMap::new();
        params.insert(
            "path".to_string(),
            serde_json::json!(pipe_path.to_string_lossy()),
        );
        let spec = spec_with_params(params);
        assert!(!PipeProbe.wait(&spec, Duration::from_millis(10)));
    }
}
