use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::process_management::{DashboardLauncher, Launcher};
use crate::session_management::session_manager::SessionManager;

/// Periodic background loop reclaiming sessions past their idle timeout.
///
/// Each cycle runs [`SessionManager::sweep_expired`] in its own task, so a
/// panic while releasing one batch is logged and the loop keeps going.
pub struct IdleReaper<L: Launcher = DashboardLauncher> {
    manager: Arc<SessionManager<L>>,
    interval: Duration,
}

impl<L: Launcher> IdleReaper<L> {
    pub fn new(manager: Arc<SessionManager<L>>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Runs the loop on the tokio runtime until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Idle reaper started, sweeping every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Idle reaper stopped");
    }

    async fn sweep_once(&self) {
        let manager = self.manager.clone();
        match tokio::spawn(async move { manager.sweep_expired().await }).await {
            Ok(0) => debug!("Reaper sweep found no expired sessions"),
            Ok(reaped) => info!("Reaper reclaimed {} expired session(s)", reaped),
            Err(e) => error!("Reaper sweep aborted: {}", e),
        }
    }
}
