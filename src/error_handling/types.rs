use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    NotInRange(String),
    MissingValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Why a dashboard process did not become ready.
#[derive(Debug)]
pub enum LaunchError {
    SpawnFailed(std::io::Error),
    Exited {
        status: ExitStatus,
        diagnostics: String,
    },
    Timeout(Duration),
    PortInUse(u16),
    IoError(std::io::Error),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::SpawnFailed(e) => write!(f, "Failed to spawn dashboard process: {}", e),
            LaunchError::Exited {
                status,
                diagnostics,
            } => {
                if diagnostics.is_empty() {
                    write!(f, "Dashboard process exited early ({})", status)
                } else {
                    write!(f, "Dashboard process exited early ({}): {}", status, diagnostics)
                }
            }
            LaunchError::Timeout(after) => write!(
                f,
                "Dashboard process did not accept connections within {}s",
                after.as_secs_f32()
            ),
            LaunchError::PortInUse(port) => {
                write!(f, "Port {} is already served by another process", port)
            }
            LaunchError::IoError(e) => write!(f, "Dashboard process IO error: {}", e),
        }
    }
}

impl std::error::Error for LaunchError {}

#[derive(Debug)]
pub enum SessionError {
    CapacityExceeded,
    NoDataAvailable,
    LaunchFailed(String),
    NotFound,
    PortsExhausted,
    CleanupFailed(String),
    IoError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::CapacityExceeded => write!(f, "Maximum number of active sessions reached"),
            SessionError::NoDataAvailable => write!(f, "No invoice database found"),
            SessionError::LaunchFailed(e) => write!(f, "Dashboard failed to start: {}", e),
            SessionError::NotFound => write!(f, "Session not found or expired"),
            SessionError::PortsExhausted => write!(f, "No dashboard ports left to allocate"),
            SessionError::CleanupFailed(e) => write!(f, "Session cleanup failed: {}", e),
            SessionError::IoError(e) => write!(f, "Session IO error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::IoError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web interface error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
