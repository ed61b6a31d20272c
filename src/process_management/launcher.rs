use log::{debug, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;

use crate::configuration::Config;
use crate::error_handling::types::LaunchError;
use crate::process_management::types::{DashboardProcess, LaunchFailure};

/// Brings a dashboard process from "not running" to "accepting connections".
///
/// Implementations must not clean up after a failed launch: any spawned
/// process travels back inside the [`LaunchFailure`] and the working area
/// belongs to the caller.
pub trait Launcher: Send + Sync + 'static {
    fn launch(
        &self,
        port: u16,
        working_area: &Path,
    ) -> impl Future<Output = Result<DashboardProcess, LaunchFailure>> + Send;
}

/// Launches the configured dashboard program and polls its port until it
/// answers, the process dies, or the launch timeout elapses.
#[derive(Debug, Clone)]
pub struct DashboardLauncher {
    program: String,
    args: Vec<String>,
    app: PathBuf,
    host: String,
    launch_timeout: Duration,
    poll_interval: Duration,
    diagnostic_limit: usize,
}

impl DashboardLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, host: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            app: PathBuf::new(),
            host: host.into(),
            launch_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            diagnostic_limit: 200,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.dashboard.program.clone(),
            args: config.dashboard.args.clone(),
            app: config.dashboard.app.clone(),
            host: config.dashboard.host.clone(),
            launch_timeout: config.launch_timeout(),
            poll_interval: config.poll_interval(),
            diagnostic_limit: config.dashboard.diagnostic_limit,
        }
    }

    pub fn with_app(mut self, app: impl Into<PathBuf>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_timeouts(mut self, launch_timeout: Duration, poll_interval: Duration) -> Self {
        self.launch_timeout = launch_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    /// Arguments for one launch with `{port}`, `{host}` and `{app}` filled in.
    pub fn command_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        let app = self.app.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port)
                    .replace("{host}", &self.host)
                    .replace("{app}", &app)
            })
            .collect()
    }

    async fn wait_until_ready(&self, process: &mut DashboardProcess) -> Result<(), LaunchError> {
        let port = process.port();
        let started = Instant::now();
        let deadline = started + self.launch_timeout;

        loop {
            self.check_alive(process).await?;

            if self.probe(port).await {
                // The listener must still be backed by our child one poll later
                tokio::time::sleep(self.poll_interval).await;
                self.check_alive(process).await?;
                info!(
                    "Dashboard ready on port {} after {:?}",
                    port,
                    started.elapsed()
                );
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LaunchError::Timeout(self.launch_timeout));
            }

            debug!("Dashboard on port {} not ready yet", port);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn check_alive(&self, process: &mut DashboardProcess) -> Result<(), LaunchError> {
        match process.try_exit_status().map_err(LaunchError::IoError)? {
            Some(status) => Err(LaunchError::Exited {
                status,
                diagnostics: process.diagnostics(self.diagnostic_limit).await,
            }),
            None => Ok(()),
        }
    }

    /// Minimal connectivity check: can a TCP connection be opened?
    async fn probe(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), port));
        matches!(
            tokio::time::timeout(self.poll_interval, connect).await,
            Ok(Ok(_))
        )
    }
}

impl Launcher for DashboardLauncher {
    async fn launch(
        &self,
        port: u16,
        working_area: &Path,
    ) -> Result<DashboardProcess, LaunchFailure> {
        let args = self.command_args(port);
        info!(
            "Starting dashboard on port {} in {}",
            port,
            working_area.display()
        );
        debug!("Dashboard command: {} {:?}", self.program, args);

        // Anything answering before our child exists belongs to someone else
        if self.probe(port).await {
            warn!("Port {} is already in use, not launching", port);
            return Err(LaunchFailure::new(LaunchError::PortInUse(port), None));
        }

        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(working_area)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchFailure::new(LaunchError::SpawnFailed(e), None))?;

        let mut process = DashboardProcess::watch(child, port);
        match self.wait_until_ready(&mut process).await {
            Ok(()) => Ok(process),
            Err(error) => Err(LaunchFailure::new(error, Some(process))),
        }
    }
}
