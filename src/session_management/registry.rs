use chrono::Utc;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::error_handling::types::SessionError;
use crate::process_management::{DashboardProcess, PortAllocator};
use crate::session_management::session::{Session, SessionInfo};
use crate::session_management::working_area::WorkingArea;
use crate::SessionStatus;

/// Everything guarded by the registry lock.
///
/// The session map, the provisioning counter and the port allocator share one
/// lock so a port is never reserved without a slot counted against the cap.
#[derive(Debug)]
struct RegistryState {
    sessions: HashMap<Uuid, Session>,
    provisioning: usize,
    ports: PortAllocator,
}

impl RegistryState {
    fn count(&self) -> usize {
        self.sessions.len() + self.provisioning
    }

    fn insert_running(&mut self, mut session: Session) -> SessionInfo {
        session.status = SessionStatus::Running;
        let info = session.info();
        debug!("Registered session {} on port {}", session.id, session.port);
        self.sessions.insert(session.id, session);
        info
    }
}

/// Single source of truth for active sessions.
///
/// All reads and writes go through one mutex that is never held across an
/// `.await`; removal hands the session out by value so exactly one caller
/// releases its resources.
#[derive(Debug)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(base_port: u16) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                provisioning: 0,
                ports: PortAllocator::new(base_port),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sessions counted against the cap: registered plus provisioning.
    pub fn count(&self) -> usize {
        self.state().count()
    }

    pub fn running_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn provisioning_count(&self) -> usize {
        self.state().provisioning
    }

    /// Inserts a session as running and, under the same lock, converts one
    /// provisioning slot if any is held. The cap is not consulted: callers go
    /// through [`SessionRegistry::reserve`] first, as
    /// [`Reservation::register`] does.
    pub(crate) fn put(&self, session: Session) -> SessionInfo {
        let mut state = self.state();
        state.provisioning = state.provisioning.saturating_sub(1);
        state.insert_running(session)
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionInfo> {
        self.state().sessions.get(id).map(Session::info)
    }

    /// Removes and returns the session so its resources can be released
    /// outside the lock.
    pub fn remove(&self, id: &Uuid) -> Option<Session> {
        let removed = self.state().sessions.remove(id);
        if removed.is_some() {
            debug!("Removed session {} from registry", id);
        }
        removed
    }

    pub fn all(&self) -> Vec<SessionInfo> {
        self.state().sessions.values().map(Session::info).collect()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &Uuid, by: Duration) -> bool {
        match self.state().sessions.get_mut(id) {
            Some(session) => {
                session.backdate(by);
                true
            }
            None => false,
        }
    }

    /// Check-and-reserve step of session creation, done under one lock.
    ///
    /// When the cap is reached, sessions older than `timeout` are evicted
    /// first; they are returned by value in the first tuple element and must
    /// be released by the caller. If the pool is still full afterwards the
    /// reservation fails with [`SessionError::CapacityExceeded`].
    pub fn reserve(
        &self,
        max_sessions: usize,
        timeout: Duration,
    ) -> (Vec<Session>, Result<Reservation<'_>, SessionError>) {
        let mut state = self.state();
        let mut evicted = Vec::new();

        if state.count() >= max_sessions {
            let now = Utc::now();
            let expired: Vec<Uuid> = state
                .sessions
                .values()
                .filter(|session| session.is_expired(now, timeout))
                .map(|session| session.id)
                .collect();
            evicted.extend(expired.iter().filter_map(|id| state.sessions.remove(id)));
            if !evicted.is_empty() {
                info!(
                    "Evicted {} expired session(s) to make room for a new one",
                    evicted.len()
                );
            }

            if state.count() >= max_sessions {
                debug!(
                    "Session cap reached ({}/{})",
                    state.count(),
                    max_sessions
                );
                return (evicted, Err(SessionError::CapacityExceeded));
            }
        }

        let port = match state.ports.allocate() {
            Some(port) => port,
            None => return (evicted, Err(SessionError::PortsExhausted)),
        };
        state.provisioning += 1;
        let id = Uuid::new_v4();
        debug!(
            "Reserved session {} on port {} ({}/{})",
            id,
            port,
            state.count(),
            max_sessions
        );
        drop(state);

        (
            evicted,
            Ok(Reservation {
                registry: self,
                id,
                port,
                registered: false,
            }),
        )
    }
}

/// A provisioning slot: an id and a port counted against the cap but not yet
/// backed by a running dashboard.
///
/// Dropping an unregistered reservation frees the slot, so a failed or
/// cancelled creation never leaks capacity. The port is not recycled.
#[derive(Debug)]
#[must_use = "an unregistered reservation frees its slot when dropped"]
pub struct Reservation<'a> {
    registry: &'a SessionRegistry,
    id: Uuid,
    port: u16,
    registered: bool,
}

impl Reservation<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Moves the reservation to the next free port, for when the current one
    /// turned out to be held by a process outside the pool.
    pub fn next_port(&mut self) -> Result<u16, SessionError> {
        let port = self
            .registry
            .state()
            .ports
            .allocate()
            .ok_or(SessionError::PortsExhausted)?;
        debug!(
            "Session {} moved from port {} to {}",
            self.id, self.port, port
        );
        self.port = port;
        Ok(port)
    }

    /// Promotes the reservation to a running session, atomically with
    /// releasing the provisioning slot.
    pub fn register(
        mut self,
        owner: Option<String>,
        process: DashboardProcess,
        working_area: WorkingArea,
    ) -> SessionInfo {
        let session = Session::new(self.id, self.port, owner, process, working_area);
        self.registered = true;
        self.registry.put(session)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.registered {
            let mut state = self.registry.state();
            state.provisioning = state.provisioning.saturating_sub(1);
            debug!(
                "Released provisioning slot of session {} (port {})",
                self.id, self.port
            );
        }
    }
}
