#[cfg(all(test, unix))]
mod tests {
    use crate::error_handling::types::{LaunchError, SessionError};
    use crate::process_management::{DashboardProcess, LaunchFailure, Launcher};
    use crate::session_management::{IdleReaper, SessionManager, SessionSettings};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::process::Stdio;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Clone, Copy)]
    enum Behavior {
        Ready,
        Hang,
        SpawnError,
    }

    // Launcher standing in for the dashboard: a `sleep` child that is either
    // reported ready or handed back as a failed launch
    #[derive(Clone)]
    struct FakeLauncher {
        behavior: Behavior,
        delay: Duration,
        busy_ports: Vec<u16>,
        launches: Arc<Mutex<Vec<Launch>>>,
    }

    #[derive(Clone, Debug)]
    struct Launch {
        port: u16,
        working_area: PathBuf,
        pid: Option<u32>,
    }

    impl FakeLauncher {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                delay: Duration::ZERO,
                busy_ports: Vec::new(),
                launches: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        // Ports answered by some process outside the pool
        fn with_busy_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
            self.busy_ports = ports.into_iter().collect();
            self
        }

        fn launches(&self) -> Vec<Launch> {
            self.launches.lock().unwrap().clone()
        }
    }

    impl Launcher for FakeLauncher {
        async fn launch(
            &self,
            port: u16,
            working_area: &Path,
        ) -> Result<DashboardProcess, LaunchFailure> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.busy_ports.contains(&port) {
                return Err(LaunchFailure::new(LaunchError::PortInUse(port), None));
            }

            if let Behavior::SpawnError = self.behavior {
                self.launches.lock().unwrap().push(Launch {
                    port,
                    working_area: working_area.to_path_buf(),
                    pid: None,
                });
                let error = std::io::Error::new(std::io::ErrorKind::NotFound, "marimo: not found");
                return Err(LaunchFailure::new(LaunchError::SpawnFailed(error), None));
            }

            let child = tokio::process::Command::new("sleep")
                .arg("30")
                .current_dir(working_area)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .unwrap();
            let process = DashboardProcess::watch(child, port);
            self.launches.lock().unwrap().push(Launch {
                port,
                working_area: working_area.to_path_buf(),
                pid: process.pid(),
            });

            match self.behavior {
                Behavior::Hang => Err(LaunchFailure::new(
                    LaunchError::Timeout(Duration::from_secs(10)),
                    Some(process),
                )),
                _ => Ok(process),
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        settings: SessionSettings,
    }

    impl Fixture {
        fn new(max_sessions: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let data_source = dir.path().join("invoices.db");
            std::fs::write(&data_source, b"invoice rows v1").unwrap();

            let settings = SessionSettings {
                max_sessions,
                session_timeout: Duration::from_secs(30 * 60),
                shutdown_grace: Duration::from_secs(2),
                base_port: 8200,
                data_source,
                work_dir: Some(dir.path().join("work")),
                dashboard_host: "127.0.0.1".to_string(),
                diagnostic_limit: 200,
            };
            Self { dir, settings }
        }

        fn manager(&self, launcher: FakeLauncher) -> SessionManager<FakeLauncher> {
            SessionManager::new(self.settings.clone(), launcher)
        }

        fn work_dir_entries(&self) -> usize {
            match std::fs::read_dir(self.dir.path().join("work")) {
                Ok(entries) => entries.count(),
                Err(_) => 0,
            }
        }
    }

    fn pid_alive(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn single_slot_scenario() {
        let fixture = Fixture::new(1);
        let manager = fixture.manager(FakeLauncher::new(Behavior::Ready));

        let first = manager.create(Some("tg:1001".to_string())).await.unwrap();
        assert_eq!(manager.registry().count(), 1);

        let err = manager.create(None).await.unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded));

        assert!(manager.terminate(&first).await);
        assert_eq!(manager.registry().count(), 0);

        let third = manager.create(None).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(manager.registry().count(), 1);
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_releases_resources() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Ready);
        let manager = fixture.manager(launcher.clone());

        let id = manager.create(None).await.unwrap();
        let launch = launcher.launches().pop().unwrap();
        let pid = launch.pid.unwrap();
        assert!(pid_alive(pid));
        assert!(launch.working_area.exists());

        assert!(manager.terminate(&id).await);
        assert!(!manager.terminate(&id).await);

        assert!(!pid_alive(pid));
        assert!(!launch.working_area.exists());
        assert!(manager.get(&id).is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_evicted_before_rejecting() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Ready);
        let manager = fixture.manager(launcher.clone());

        let a = manager.create(None).await.unwrap();
        let b = manager.create(None).await.unwrap();
        assert!(manager.registry().backdate(&a, HOUR));
        assert!(manager.registry().backdate(&b, HOUR));
        let old = launcher.launches();

        let c = manager.create(None).await.unwrap();
        assert_eq!(manager.registry().count(), 1);
        assert!(manager.get(&c).is_some());
        assert!(manager.get(&a).is_none());
        assert!(manager.get(&b).is_none());
        assert_eq!(manager.stats().reaped, 2);

        for launch in old {
            assert!(!launch.working_area.exists());
            assert!(!pid_alive(launch.pid.unwrap()));
        }
    }

    #[tokio::test]
    async fn fresh_sessions_are_not_evicted() {
        let fixture = Fixture::new(2);
        let manager = fixture.manager(FakeLauncher::new(Behavior::Ready));

        let a = manager.create(None).await.unwrap();
        manager.create(None).await.unwrap();
        assert!(manager.registry().backdate(&a, HOUR));

        // One expired session frees exactly one slot
        manager.create(None).await.unwrap();
        let err = manager.create(None).await.unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded));
        assert_eq!(manager.registry().count(), 2);
    }

    #[tokio::test]
    async fn missing_data_skips_launch() {
        let fixture = Fixture::new(2);
        std::fs::remove_file(&fixture.settings.data_source).unwrap();
        let launcher = FakeLauncher::new(Behavior::Ready);
        let manager = fixture.manager(launcher.clone());

        let err = manager.create(None).await.unwrap_err();
        assert!(matches!(err, SessionError::NoDataAvailable));
        assert!(launcher.launches().is_empty());
        assert_eq!(manager.registry().count(), 0);
        assert_eq!(fixture.work_dir_entries(), 0);
    }

    #[tokio::test]
    async fn launch_timeout_leaves_nothing_behind() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Hang);
        let manager = fixture.manager(launcher.clone());

        let err = manager.create(None).await.unwrap_err();
        match err {
            SessionError::LaunchFailed(message) => {
                assert!(message.contains("did not accept connections"))
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(manager.registry().count(), 0);
        assert!(manager.list().is_empty());
        assert_eq!(fixture.work_dir_entries(), 0);
        let launch = launcher.launches().pop().unwrap();
        assert!(!pid_alive(launch.pid.unwrap()));
        assert_eq!(manager.stats().failed_launches, 1);
    }

    #[tokio::test]
    async fn ports_held_by_outside_processes_are_skipped() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Ready).with_busy_ports([8200, 8201]);
        let manager = fixture.manager(launcher.clone());

        let id = manager.create(None).await.unwrap();
        assert_eq!(manager.get(&id).unwrap().port, 8202);
        assert_eq!(manager.get_url(&id).unwrap(), "http://127.0.0.1:8202");
        assert_eq!(launcher.launches().len(), 1);
        assert_eq!(manager.stats().failed_launches, 0);

        let next = manager.create(None).await.unwrap();
        assert_eq!(manager.get(&next).unwrap().port, 8203);
    }

    #[tokio::test]
    async fn port_search_gives_up_after_a_few_attempts() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Ready).with_busy_ports(8200..8210);
        let manager = fixture.manager(launcher.clone());

        match manager.create(None).await.unwrap_err() {
            SessionError::LaunchFailed(message) => {
                assert!(message.contains("already served"), "got {:?}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(launcher.launches().is_empty());
        assert_eq!(manager.registry().count(), 0);
        assert_eq!(manager.stats().failed_launches, 1);
        assert_eq!(fixture.work_dir_entries(), 0);
    }

    #[tokio::test]
    async fn launch_errors_are_truncated() {
        let mut fixture = Fixture::new(1);
        fixture.settings.diagnostic_limit = 10;
        let manager = fixture.manager(FakeLauncher::new(Behavior::SpawnError));

        match manager.create(None).await.unwrap_err() {
            SessionError::LaunchFailed(message) => assert_eq!(message.chars().count(), 10),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fixture.work_dir_entries(), 0);

        // A failed launch does not hold on to its slot
        assert_eq!(manager.registry().count(), 0);
    }

    #[tokio::test]
    async fn sessions_get_an_isolated_data_copy() {
        let fixture = Fixture::new(2);
        let launcher = FakeLauncher::new(Behavior::Ready);
        let manager = fixture.manager(launcher.clone());

        let id = manager.create(None).await.unwrap();
        std::fs::write(&fixture.settings.data_source, b"invoice rows v2").unwrap();

        let info = manager.get(&id).unwrap();
        let copy = std::fs::read(info.working_area.join("invoices.db")).unwrap();
        assert_eq!(copy, b"invoice rows v1");
        assert_eq!(launcher.launches()[0].working_area, info.working_area);
    }

    #[tokio::test]
    async fn urls_and_lookups() {
        let fixture = Fixture::new(2);
        let manager = fixture.manager(FakeLauncher::new(Behavior::Ready));

        let id = manager.create(Some("42".to_string())).await.unwrap();
        assert_eq!(manager.get_url(&id).unwrap(), "http://127.0.0.1:8200");
        assert_eq!(manager.get(&id).unwrap().owner.as_deref(), Some("42"));
        assert!(manager.get_url(&uuid::Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_respect_the_cap() {
        let fixture = Fixture::new(3);
        let launcher = FakeLauncher::new(Behavior::Ready).with_delay(Duration::from_millis(100));
        let manager = Arc::new(fixture.manager(launcher.clone()));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.create(None).await })
            })
            .collect();

        let mut created = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(SessionError::CapacityExceeded) => rejected += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(created, 3);
        assert_eq!(rejected, 7);
        assert_eq!(manager.registry().count(), 3);

        let ports: HashSet<u16> = manager.list().iter().map(|info| info.port).collect();
        assert_eq!(ports.len(), 3);

        assert_eq!(manager.terminate_all().await, 3);
        assert_eq!(manager.registry().count(), 0);
        assert_eq!(fixture.work_dir_entries(), 0);
    }

    #[tokio::test]
    async fn sweep_only_reaps_expired_sessions() {
        let fixture = Fixture::new(4);
        let manager = fixture.manager(FakeLauncher::new(Behavior::Ready));

        let old = manager.create(None).await.unwrap();
        let fresh = manager.create(None).await.unwrap();
        manager.registry().backdate(&old, HOUR);

        assert_eq!(manager.sweep_expired().await, 1);
        assert!(manager.get(&old).is_none());
        assert!(manager.get(&fresh).is_some());
        assert_eq!(manager.sweep_expired().await, 0);
        assert_eq!(manager.stats().reaped, 1);
    }

    #[tokio::test]
    async fn reaper_loop_reclaims_and_stops() {
        let fixture = Fixture::new(2);
        let manager = Arc::new(fixture.manager(FakeLauncher::new(Behavior::Ready)));

        let id = manager.create(None).await.unwrap();
        manager.registry().backdate(&id, HOUR);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = IdleReaper::new(manager.clone(), Duration::from_millis(20)).spawn(shutdown_rx);

        for _ in 0..100 {
            if manager.registry().count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.registry().count(), 0);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stats_track_lifecycle() {
        let fixture = Fixture::new(3);
        let manager = fixture.manager(FakeLauncher::new(Behavior::Ready));

        let id = manager.create(None).await.unwrap();
        manager.create(None).await.unwrap();
        manager.terminate(&id).await;

        let stats = manager.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.provisioning, 0);
        assert_eq!(stats.max_sessions, 3);
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.failed_launches, 0);
    }
}
