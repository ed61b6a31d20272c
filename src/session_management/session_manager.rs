use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::configuration::Config;
use crate::error_handling::types::{LaunchError, SessionError};
use crate::process_management::types::truncate_chars;
use crate::process_management::{DashboardLauncher, DashboardProcess, Launcher};
use crate::session_management::registry::SessionRegistry;
use crate::session_management::session::{Session, SessionInfo};
use crate::session_management::working_area::WorkingArea;

/// Ports tried per creation when the allocated one is held by an outside
/// process, e.g. a dashboard left over from an earlier run.
const MAX_PORT_ATTEMPTS: usize = 5;

/// Pool limits and resource locations used by the [`SessionManager`].
///
/// # Fields Overview
///
/// - `max_sessions`: cap on provisioning plus running sessions
/// - `session_timeout`: age after which a session is evicted
/// - `shutdown_grace`: how long a dashboard may take to exit before it is killed
/// - `base_port`: first port handed out to dashboards
/// - `data_source`: file copied into every new working area
/// - `work_dir`: parent of working areas, system temp dir when `None`
/// - `dashboard_host`: host used to build session URLs
/// - `diagnostic_limit`: max characters of launch diagnostics returned to callers
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub session_timeout: Duration,
    pub shutdown_grace: Duration,
    pub base_port: u16,
    pub data_source: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub dashboard_host: String,
    pub diagnostic_limit: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_sessions: config.sessions.max_sessions,
            session_timeout: config.session_timeout(),
            shutdown_grace: config.shutdown_grace(),
            base_port: config.sessions.base_port,
            data_source: config.dashboard.data_source.clone(),
            work_dir: config.sessions.work_dir.clone(),
            dashboard_host: config.dashboard.host.clone(),
            diagnostic_limit: config.dashboard.diagnostic_limit,
        }
    }
}

/// Aggregate counters describing the current and historical pool state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Registered sessions with a ready dashboard.
    pub active: usize,
    /// Reserved slots whose dashboard is still starting.
    pub provisioning: usize,
    pub max_sessions: usize,
    /// Sessions successfully created since start-up.
    pub total_created: u64,
    pub failed_launches: u64,
    /// Sessions evicted for exceeding the idle timeout.
    pub reaped: u64,
}

/// Facade over the registry, the port allocator and the launcher.
///
/// Creation enforces the cap (running an eviction sweep first when the pool is
/// full), provisions an isolated working area, launches the dashboard and
/// registers it. Every termination path, explicit, reaped or failed startup,
/// goes through the same release routine.
pub struct SessionManager<L: Launcher = DashboardLauncher> {
    registry: SessionRegistry,
    launcher: L,
    settings: SessionSettings,
    total_created: AtomicU64,
    failed_launches: AtomicU64,
    reaped: AtomicU64,
}

impl<L: Launcher> SessionManager<L> {
    pub fn new(settings: SessionSettings, launcher: L) -> Self {
        info!(
            "SessionManager initialized (max {} sessions, timeout {:?}, base port {})",
            settings.max_sessions, settings.session_timeout, settings.base_port
        );
        Self {
            registry: SessionRegistry::new(settings.base_port),
            launcher,
            settings,
            total_created: AtomicU64::new(0),
            failed_launches: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Provisions a new dashboard session and returns its id.
    pub async fn create(&self, owner: Option<String>) -> Result<Uuid, SessionError> {
        debug!(
            "Creating session for {} ({}/{} in use)",
            owner.as_deref().unwrap_or("anonymous"),
            self.registry.count(),
            self.settings.max_sessions
        );

        let (evicted, reservation) = self
            .registry
            .reserve(self.settings.max_sessions, self.settings.session_timeout);
        if !evicted.is_empty() {
            self.reaped
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            for session in evicted {
                self.release(session).await;
            }
        }
        let mut reservation = reservation.map_err(|e| {
            warn!("Refusing new session: {}", e);
            e
        })?;
        let id = reservation.id();

        let working_area = WorkingArea::create(self.settings.work_dir.as_deref(), &id)?;
        if let Err(e) = working_area.seed_from(&self.settings.data_source).await {
            error!(
                "Cannot seed session {} from {}: {}",
                id,
                self.settings.data_source.display(),
                e
            );
            discard_working_area(working_area);
            return Err(e);
        }

        let mut attempts = 1;
        let launched = loop {
            match self.launcher.launch(reservation.port(), working_area.path()).await {
                Err(failure)
                    if matches!(failure.error, LaunchError::PortInUse(_))
                        && attempts < MAX_PORT_ATTEMPTS =>
                {
                    attempts += 1;
                    warn!("Session {}: {}, trying the next port", id, failure.error);
                    if let Some(process) = failure.process {
                        self.stop_process(&id, process).await;
                    }
                    if let Err(e) = reservation.next_port() {
                        discard_working_area(working_area);
                        return Err(e);
                    }
                }
                other => break other,
            }
        };

        match launched {
            Ok(process) => {
                let info = reservation.register(owner, process, working_area);
                self.total_created.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Session {} running on port {} (owner: {})",
                    info.id,
                    info.port,
                    info.owner.as_deref().unwrap_or("-")
                );
                Ok(info.id)
            }
            Err(failure) => {
                self.failed_launches.fetch_add(1, Ordering::Relaxed);
                error!("Dashboard for session {} failed: {}", id, failure.error);
                if let Some(process) = failure.process {
                    self.stop_process(&id, process).await;
                }
                discard_working_area(working_area);
                Err(SessionError::LaunchFailed(truncate_chars(
                    &failure.error.to_string(),
                    self.settings.diagnostic_limit,
                )))
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionInfo> {
        self.registry.get(id)
    }

    /// Address of the session's dashboard.
    pub fn get_url(&self, id: &Uuid) -> Option<String> {
        self.registry.get(id).map(|info| self.url_for(info.port))
    }

    pub fn url_for(&self, port: u16) -> String {
        match self.settings.dashboard_host.parse::<IpAddr>() {
            Ok(ip) => format!("http://{}", SocketAddr::new(ip, port)),
            Err(_) => format!("http://{}:{}", self.settings.dashboard_host, port),
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions = self.registry.all();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    /// Terminates one session. Returns `false` when the id is unknown, which
    /// makes repeated calls harmless.
    pub async fn terminate(&self, id: &Uuid) -> bool {
        match self.registry.remove(id) {
            Some(session) => {
                self.release(session).await;
                true
            }
            None => {
                debug!("Terminate requested for unknown session {}", id);
                false
            }
        }
    }

    /// Terminates every registered session; used at orderly shutdown.
    pub async fn terminate_all(&self) -> usize {
        let sessions = self.registry.all();
        info!("Terminating {} active session(s)", sessions.len());
        let mut terminated = 0;
        for info in sessions {
            if self.terminate(&info.id).await {
                terminated += 1;
            }
        }
        terminated
    }

    /// Terminates every session older than the idle timeout and returns how
    /// many were reclaimed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<SessionInfo> = self
            .registry
            .all()
            .into_iter()
            .filter(|info| info.is_expired(now, self.settings.session_timeout))
            .collect();

        let mut reaped = 0;
        for info in expired {
            info!(
                "Reaping session {} (age {}s)",
                info.id,
                info.age(now).num_seconds()
            );
            if self.terminate(&info.id).await {
                reaped += 1;
            }
        }
        self.reaped.fetch_add(reaped as u64, Ordering::Relaxed);
        reaped
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.registry.running_count(),
            provisioning: self.registry.provisioning_count(),
            max_sessions: self.settings.max_sessions,
            total_created: self.total_created.load(Ordering::Relaxed),
            failed_launches: self.failed_launches.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }

    async fn stop_process(&self, id: &Uuid, process: DashboardProcess) {
        if let Err(e) = process.shutdown(self.settings.shutdown_grace).await {
            warn!("Failed to stop dashboard of session {}: {}", id, e);
        }
    }

    async fn release(&self, session: Session) {
        let id = session.id;
        if let Err(e) = session.release(self.settings.shutdown_grace).await {
            warn!("Session {} was not fully released: {}", id, e);
        }
    }
}

fn discard_working_area(working_area: WorkingArea) {
    let path = working_area.path().to_path_buf();
    if let Err(e) = working_area.remove() {
        warn!(
            "Failed to remove working area {}: {}",
            path.display(),
            e
        );
    }
}
