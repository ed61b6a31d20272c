use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Args;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file (see [`Config::from_file`]); every
/// section is optional and falls back to its defaults. Command-line flags and
/// `DASHPOOL_*` environment variables, collected in [`Overrides`], take
/// precedence over file values.
///
/// # Examples
///
/// ```
/// use dashpool::configuration::Config;
///
/// let config = Config::from_toml_str("[sessions]\nmax_sessions = 2\n").unwrap();
/// assert_eq!(config.sessions.max_sessions, 2);
/// assert_eq!(config.sessions.base_port, 8200);
/// ```
///
/// # Fields Overview
///
/// - `server`: where the HTTP boundary listens and how it advertises itself
/// - `sessions`: pool cap, idle timeout, port base and reaper cadence
/// - `dashboard`: the program launched per session and its readiness probing
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    pub dashboard: DashboardConfig,
}

/// Command-line overrides layered on top of the configuration file.
///
/// Each flag can also be supplied through the environment variable named in
/// its `env` attribute.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Address the HTTP API binds to
    #[arg(long, env = "DASHPOOL_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port the HTTP API listens on
    #[arg(long, env = "DASHPOOL_PORT")]
    pub port: Option<u16>,

    /// First port handed out to dashboard processes
    #[arg(long, env = "DASHPOOL_BASE_PORT")]
    pub base_port: Option<u16>,

    /// Maximum number of concurrent dashboard sessions
    #[arg(long, env = "DASHPOOL_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Minutes after which a session is reclaimed
    #[arg(long, env = "DASHPOOL_SESSION_TIMEOUT_MINUTES")]
    pub session_timeout_minutes: Option<u64>,

    /// Seconds to wait for a dashboard to accept connections
    #[arg(long, env = "DASHPOOL_LAUNCH_TIMEOUT_SECS")]
    pub launch_timeout_secs: Option<u64>,

    /// Seconds between two reaper sweeps
    #[arg(long, env = "DASHPOOL_REAPER_INTERVAL_SECS")]
    pub reaper_interval_secs: Option<u64>,

    /// Data file copied into every session's working area
    #[arg(long, env = "DASHPOOL_DATA_SOURCE")]
    pub data_source: Option<PathBuf>,
}

impl Config {
    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Applies command-line and environment overrides.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(bind_address) = &overrides.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(base_port) = overrides.base_port {
            self.sessions.base_port = base_port;
        }
        if let Some(max_sessions) = overrides.max_sessions {
            self.sessions.max_sessions = max_sessions;
        }
        if let Some(minutes) = overrides.session_timeout_minutes {
            self.sessions.session_timeout_minutes = minutes;
        }
        if let Some(secs) = overrides.launch_timeout_secs {
            self.dashboard.launch_timeout_secs = secs;
        }
        if let Some(secs) = overrides.reaper_interval_secs {
            self.sessions.reaper_interval_secs = secs;
        }
        if let Some(data_source) = &overrides.data_source {
            self.dashboard.data_source = data_source.clone();
        }
    }

    /// Checks value ranges and address formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("server.bind_address: {}", e)))?;
        self.dashboard
            .host
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("dashboard.host: {}", e)))?;

        if self.server.public_url.trim().is_empty() {
            return Err(ConfigError::MissingValue("server.public_url".to_string()));
        }
        if self.dashboard.program.trim().is_empty() {
            return Err(ConfigError::MissingValue("dashboard.program".to_string()));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.max_sessions must be at least 1".to_string(),
            ));
        }
        if self.sessions.base_port < 1024 {
            return Err(ConfigError::NotInRange(format!(
                "sessions.base_port {} is in the reserved range",
                self.sessions.base_port
            )));
        }
        if self.sessions.reaper_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.reaper_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.dashboard.launch_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "dashboard.launch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.dashboard.poll_interval_ms < 10 {
            return Err(ConfigError::NotInRange(
                "dashboard.poll_interval_ms must be at least 10".to_string(),
            ));
        }
        Ok(())
    }

    /// Makes `dashboard.app`, `dashboard.data_source` and `sessions.work_dir`
    /// absolute. Dashboards run with their working area as cwd, so relative
    /// paths would not resolve there.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.dashboard.app = absolutize(base, &self.dashboard.app);
        self.dashboard.data_source = absolutize(base, &self.dashboard.data_source);
        if let Some(work_dir) = &self.sessions.work_dir {
            self.sessions.work_dir = Some(absolutize(base, work_dir));
        }
        debug!(
            "Resolved dashboard app {} and data source {}",
            self.dashboard.app.display(),
            self.dashboard.data_source.display()
        );
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.session_timeout_minutes.saturating_mul(60))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.reaper_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.sessions.shutdown_grace_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard.launch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.dashboard.poll_interval_ms)
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
