use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the HTTP boundary that chat bots and browsers talk to.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Externally reachable base URL, used to build `/d/{id}` links.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1"),
            port: 5001,
            public_url: String::from("http://127.0.0.1:5001"),
        }
    }
}

/// Limits and timings that govern the session pool.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub base_port: u16,
    pub max_sessions: usize,
    pub session_timeout_minutes: u64,
    pub reaper_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Parent directory for working areas; the system temp dir when unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_port: 8200,
            max_sessions: 10,
            session_timeout_minutes: 30,
            reaper_interval_secs: 60,
            shutdown_grace_secs: 5,
            work_dir: None,
        }
    }
}

/// How a dashboard process is started and probed.
///
/// `args` may contain the placeholders `{port}`, `{host}` and `{app}`, which are
/// substituted for every launch.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub program: String,
    pub args: Vec<String>,
    pub app: PathBuf,
    pub host: String,
    pub data_source: PathBuf,
    pub launch_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub diagnostic_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            program: String::from("marimo"),
            args: ["run", "{app}", "--host", "{host}", "--port", "{port}", "--headless"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            app: PathBuf::from("marimo_app/dashboard.py"),
            host: String::from("127.0.0.1"),
            data_source: PathBuf::from("database/invoices.db"),
            launch_timeout_secs: 10,
            poll_interval_ms: 500,
            diagnostic_limit: 200,
        }
    }
}
