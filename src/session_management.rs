//! Session management core module.
//!
//! This module provides the types and submodules for managing dashboard
//! sessions: the session record and its working area, the registry that is
//! the single source of truth for active sessions, the manager facade that
//! creates and terminates them, and the idle reaper.

use serde::{Deserialize, Serialize};

/// Submodule for the background eviction loop.
pub mod reaper;
/// Submodule for the lock-protected session table.
pub mod registry;
/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for session manager implementation.
pub mod session_manager;
#[cfg(test)]
mod tests;
/// Submodule for per-session private directories.
pub mod working_area;

pub use reaper::IdleReaper;
pub use registry::{Reservation, SessionRegistry};
pub use session::{Session, SessionInfo};
pub use session_manager::{SessionManager, SessionSettings, SessionStats};
pub use working_area::WorkingArea;

/// Lifecycle of a session.
///
/// Variants:
/// - `Provisioning`: a slot and port are reserved, the dashboard is starting.
/// - `Running`: the dashboard answered its health probe and is registered.
/// - `Terminated`: process stopped and working area deleted. Absorbing; the
///   registry never holds terminated sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Provisioning,
    Running,
    Terminated,
}
