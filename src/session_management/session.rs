use chrono::{DateTime, TimeDelta, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error_handling::types::SessionError;
use crate::process_management::DashboardProcess;
use crate::session_management::working_area::WorkingArea;
use crate::SessionStatus;

/// One provisioned dashboard: its port, process and private working area.
///
/// The process and the working area are owned exclusively by the session and
/// are released together by [`Session::release`], which consumes the value.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub port: u16,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    process: DashboardProcess,
    working_area: WorkingArea,
}

/// Read-only snapshot of a session, safe to hand out of the registry lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub port: u16,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub working_area: PathBuf,
}

impl Session {
    pub fn new(
        id: Uuid,
        port: u16,
        owner: Option<String>,
        process: DashboardProcess,
        working_area: WorkingArea,
    ) -> Self {
        Self {
            id,
            port,
            owner,
            created_at: Utc::now(),
            status: SessionStatus::Provisioning,
            process,
            working_area,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            port: self.port,
            owner: self.owner.clone(),
            created_at: self.created_at,
            status: self.status,
            working_area: self.working_area.path().to_path_buf(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        is_expired(self.created_at, now, timeout)
    }

    /// Stops the process and deletes the working area.
    ///
    /// Both steps are attempted even when the first one fails; the first
    /// error encountered is returned.
    pub async fn release(self, grace: Duration) -> Result<(), SessionError> {
        let Session {
            id,
            process,
            working_area,
            ..
        } = self;

        let stopped = process.shutdown(grace).await;
        if let Err(e) = &stopped {
            warn!("Failed to stop dashboard of session {}: {}", id, e);
        }

        let area = working_area.path().to_path_buf();
        let removed = working_area.remove();
        if let Err(e) = &removed {
            warn!(
                "Failed to remove working area {} of session {}: {}",
                area.display(),
                id,
                e
            );
        }

        info!("Session {} terminated", id);
        stopped.map_err(|e| SessionError::CleanupFailed(e.to_string()))?;
        removed.map_err(|e| SessionError::CleanupFailed(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.created_at = self.created_at - timeout_delta(by);
    }
}

impl SessionInfo {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        is_expired(self.created_at, now, timeout)
    }

    /// Creation time plus the idle timeout.
    pub fn expires_at(&self, timeout: Duration) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(timeout_delta(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

pub(crate) fn timeout_delta(timeout: Duration) -> TimeDelta {
    TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}

fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    now - created_at > timeout_delta(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_created(ago: TimeDelta) -> SessionInfo {
        SessionInfo {
            id: Uuid::new_v4(),
            port: 8200,
            owner: Some("42".to_string()),
            created_at: Utc::now() - ago,
            status: SessionStatus::Running,
            working_area: PathBuf::from("/tmp/dashboard_session_x"),
        }
    }

    #[test]
    fn expiry_requires_age_strictly_above_timeout() {
        let info = info_created(TimeDelta::zero());
        let timeout = Duration::from_secs(30 * 60);

        assert!(!info.is_expired(info.created_at, timeout));
        assert!(!info.is_expired(info.created_at + TimeDelta::minutes(30), timeout));
        assert!(info.is_expired(
            info.created_at + TimeDelta::minutes(30) + TimeDelta::milliseconds(1),
            timeout
        ));
    }

    #[test]
    fn expires_at_adds_timeout() {
        let info = info_created(TimeDelta::minutes(10));
        let expires = info.expires_at(Duration::from_secs(30 * 60));
        assert_eq!(expires - info.created_at, TimeDelta::minutes(30));
        assert!(info.age(Utc::now()) >= TimeDelta::minutes(10));
    }

    #[test]
    fn huge_timeouts_saturate() {
        let info = info_created(TimeDelta::zero());
        assert_eq!(info.expires_at(Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert!(!info.is_expired(Utc::now(), Duration::MAX));
    }

    #[test]
    fn info_serializes_status_in_lowercase() {
        let json = serde_json::to_value(info_created(TimeDelta::zero())).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["owner"], "42");
    }
}
