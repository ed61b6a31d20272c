//! Core types used by the process management subsystem.

use log::{debug, warn};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::error_handling::types::LaunchError;

/// Upper bound on stderr bytes kept for diagnostics.
const CAPTURE_LIMIT: usize = 8 * 1024;

/// How long to wait for the stderr reader to drain after the process exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A running dashboard process bound to one port.
///
/// Stdout and stderr are drained continuously by background tasks so the
/// process never blocks on a full pipe; the first bytes of stderr are kept
/// for failure diagnostics. The handle is consumed by [`shutdown`], which
/// makes a second release impossible.
///
/// [`shutdown`]: DashboardProcess::shutdown
#[derive(Debug)]
pub struct DashboardProcess {
    child: Child,
    port: u16,
    captured_stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl DashboardProcess {
    /// Wraps a freshly spawned child and starts draining its output pipes.
    pub fn watch(mut child: Child, port: u16) -> Self {
        let captured_stderr = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, port, "stdout", None));
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_lines(
                stderr,
                port,
                "stderr",
                Some(captured_stderr.clone()),
            ))
        });

        Self {
            child,
            port,
            captured_stderr,
            stderr_task,
        }
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Non-blocking exit check.
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Captured stderr, cut to at most `limit` characters.
    ///
    /// When the process has already exited this first waits (briefly) for the
    /// stderr reader to reach end of stream so late output is not lost.
    pub async fn diagnostics(&mut self, limit: usize) -> String {
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                debug!("stderr of dashboard on port {} still open", self.port);
            }
        }
        let captured = match self.captured_stderr.lock() {
            Ok(captured) => captured.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        truncate_chars(captured.trim(), limit)
    }

    /// Stops the process: a polite termination request first, then a forced
    /// kill if it is still alive after `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), LaunchError> {
        if let Some(status) = self.child.try_wait().map_err(LaunchError::IoError)? {
            debug!(
                "Dashboard on port {} had already exited ({})",
                self.port, status
            );
            return Ok(());
        }

        self.request_stop();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Dashboard on port {} stopped ({})", self.port, status);
                Ok(())
            }
            Ok(Err(e)) => Err(LaunchError::IoError(e)),
            Err(_) => {
                warn!(
                    "Dashboard on port {} ignored termination for {:?}, killing it",
                    self.port, grace
                );
                self.child.kill().await.map_err(LaunchError::IoError)
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to signal dashboard process {}: {}", pid, e);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to stop dashboard on port {}: {}", self.port, e);
        }
    }
}

/// A launch that did not reach the ready state.
///
/// If a process was spawned it is handed back so the caller can release it;
/// the launcher never cleans up behind itself.
#[derive(Debug)]
pub struct LaunchFailure {
    pub error: LaunchError,
    pub process: Option<DashboardProcess>,
}

impl LaunchFailure {
    pub fn new(error: LaunchError, process: Option<DashboardProcess>) -> Self {
        Self { error, process }
    }
}

async fn forward_lines<R>(
    stream: R,
    port: u16,
    label: &'static str,
    capture: Option<Arc<Mutex<String>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[dashboard:{}][{}] {}", port, label, line);
        if let Some(capture) = &capture {
            if let Ok(mut buffer) = capture.lock() {
                if buffer.len() < CAPTURE_LIMIT {
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
            }
        }
    }
    debug!("{} monitoring ended for dashboard on port {}", label, port);
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
