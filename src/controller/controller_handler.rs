use log::{error, info, warn};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;

use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::process_management::DashboardLauncher;
use crate::session_management::{IdleReaper, SessionManager, SessionSettings};
use crate::web_interface::WebServer;

/// Wires the session pool, the idle reaper and the HTTP API together and
/// owns their lifetime.
pub struct Controller {
    pub config: Config,
    manager: Arc<SessionManager<DashboardLauncher>>,
}

impl Controller {
    /// Validates the configuration and prepares the session pool. Nothing is
    /// spawned until [`Controller::run`].
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;

        if let Some(work_dir) = &config.sessions.work_dir {
            std::fs::create_dir_all(work_dir).map_err(|e| {
                ControllerError::InitializationFailed(format!(
                    "cannot create work directory {}: {}",
                    work_dir.display(),
                    e
                ))
            })?;
        }
        if !config.dashboard.data_source.is_file() {
            warn!(
                "Data source {} does not exist yet, dashboards cannot start until it does",
                config.dashboard.data_source.display()
            );
        }

        let launcher = DashboardLauncher::from_config(&config);
        let manager = Arc::new(SessionManager::new(
            SessionSettings::from_config(&config),
            launcher,
        ));
        Ok(Self { config, manager })
    }

    pub fn manager(&self) -> Arc<SessionManager<DashboardLauncher>> {
        self.manager.clone()
    }

    fn listen_address(&self) -> Result<SocketAddr, ControllerError> {
        let ip: IpAddr = self.config.server.bind_address.parse().map_err(|e| {
            ControllerError::ConfigurationError(ConfigError::BadIPFormatting(format!(
                "server.bind_address: {}",
                e
            )))
        })?;
        Ok(SocketAddr::new(ip, self.config.server.port))
    }

    /// Serves until SIGINT or SIGTERM, then shuts everything down.
    pub async fn run(&self) -> Result<(), ControllerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves. The reaper is stopped first, then
    /// every remaining session is terminated.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.listen_address()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let reaper =
            IdleReaper::new(self.manager.clone(), self.config.reaper_interval()).spawn(stop_rx);

        let server = WebServer::new(self.manager.clone(), self.config.server.public_url.clone());
        let served = server.run(addr, shutdown).await;

        info!("Stopping the idle reaper");
        let _ = stop_tx.send(true);
        if let Err(e) = reaper.await {
            error!("Idle reaper ended abnormally: {}", e);
        }

        self.shutdown().await;
        served.map_err(ControllerError::from)
    }

    /// Terminates every active session.
    pub async fn shutdown(&self) {
        let terminated = self.manager.terminate_all().await;
        info!("Terminated {} session(s) on shutdown", terminated);
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
