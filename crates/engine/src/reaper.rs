//! Inactivity reaper.
//!
//! Walks the registry on a fixed cadence, tears down sandboxes idle past
//! the threshold, prunes expired published files, and removes registry rows
//! whose containers the runtime no longer knows. Never surfaces errors to
//! users; everything is logged and retried next tick.

use crate::coordinator::Coordinator;
use cinderbox_core::config::{ReaperConfig, ResultsConfig};
use std::sync::Arc;
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic teardown task.
pub struct Reaper {
    coordinator: Arc<Coordinator>,
    config: ReaperConfig,
    results: ResultsConfig,
}

impl Reaper {
    pub fn new(coordinator: Arc<Coordinator>, config: ReaperConfig, results: ResultsConfig) -> Self {
        Self {
            coordinator,
            config,
            results,
        }
    }

    /// Spawn the reaper loop. The first tick fires one full interval after
    /// startup.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            interval.tick().await;
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// One reaper pass. Public so tests (and an admin trigger) can run it
    /// on demand.
    pub async fn tick(&self) {
        let snapshot = match self.coordinator.registry().list_all_sandboxes().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "reaper could not snapshot the registry");
                return;
            }
        };

        let now = OffsetDateTime::now_utc();
        let threshold = time::Duration::try_from(self.config.inactivity_threshold())
            .unwrap_or(time::Duration::MAX);
        let mut reaped = 0usize;

        for sandbox in &snapshot {
            if now - sandbox.last_used_at <= threshold {
                continue;
            }
            match self.coordinator.teardown(sandbox.sandbox_id).await {
                Ok(()) => {
                    info!(sandbox_id = %sandbox.sandbox_id, "reaped idle sandbox");
                    reaped += 1;
                }
                // Logged and retried next tick.
                Err(e) => {
                    warn!(sandbox_id = %sandbox.sandbox_id, error = %e, "failed to reap sandbox")
                }
            }
        }

        match self
            .coordinator
            .publisher()
            .prune(SystemTime::now(), self.results.file_ttl())
            .await
        {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "pruned expired published files"),
            Err(e) => warn!(error = %e, "failed to prune published files"),
        }

        self.verify_containers(&snapshot).await;

        if reaped > 0 {
            debug!(reaped, "reaper pass complete");
        }
    }

    /// Drop registry rows whose containers vanished out-of-band, so every
    /// surviving row addresses a real container.
    async fn verify_containers(&self, snapshot: &[cinderbox_registry::SandboxRow]) {
        for sandbox in snapshot {
            let alive = match self.coordinator.driver().exists(&sandbox.container_id).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(container_id = %sandbox.container_id, error = %e,
                        "could not verify container");
                    continue;
                }
            };
            if alive {
                continue;
            }
            match self.coordinator.teardown(sandbox.sandbox_id).await {
                Ok(()) => {
                    info!(sandbox_id = %sandbox.sandbox_id, "dropped sandbox with lost container")
                }
                Err(e) => {
                    warn!(sandbox_id = %sandbox.sandbox_id, error = %e,
                        "failed to drop sandbox with lost container")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinderbox_core::config::ContainerConfig;
    use cinderbox_driver::testing::FakeDriver;
    use cinderbox_driver::ContainerDriver;
    use cinderbox_publisher::FilePublisher;
    use cinderbox_registry::{RegistryStore, SqliteStore, UserRow};
    use uuid::Uuid;

    struct TestReaper {
        _temp: tempfile::TempDir,
        driver: Arc<FakeDriver>,
        registry: Arc<dyn RegistryStore>,
        coordinator: Arc<Coordinator>,
        reaper: Reaper,
    }

    async fn reaper_env() -> TestReaper {
        let temp = tempfile::tempdir().unwrap();
        let registry: Arc<dyn RegistryStore> = Arc::new(
            SqliteStore::new(temp.path().join("registry.db"))
                .await
                .unwrap(),
        );
        let driver = Arc::new(FakeDriver::new());
        let publisher = Arc::new(
            FilePublisher::new(temp.path().join("results"))
                .await
                .unwrap(),
        );
        let coordinator = Arc::new(Coordinator::new(
            ContainerConfig::default(),
            registry.clone(),
            driver.clone() as Arc<dyn ContainerDriver>,
            publisher,
        ));
        let reaper = Reaper::new(
            coordinator.clone(),
            ReaperConfig {
                interval_secs: 1,
                inactivity_threshold_secs: 3600,
            },
            ResultsConfig::default(),
        );
        TestReaper {
            _temp: temp,
            driver,
            registry,
            coordinator,
            reaper,
        }
    }

    async fn make_user(registry: &Arc<dyn RegistryStore>) -> Uuid {
        let user = UserRow {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.test".to_string(),
            password_hash: "$argon2id$test".to_string(),
            api_key: format!("key-{}", Uuid::new_v4()),
            created_at: OffsetDateTime::now_utc(),
            is_active: true,
        };
        registry.create_user(&user).await.unwrap();
        user.user_id
    }

    #[tokio::test]
    async fn idle_sandboxes_are_reaped_active_ones_kept() {
        let env = reaper_env().await;
        let user = make_user(&env.registry).await;

        let idle = env.coordinator.create_sandbox(user, None).await.unwrap();
        let active = env.coordinator.create_sandbox(user, None).await.unwrap();

        // Backdate the idle sandbox past the threshold.
        let stale = OffsetDateTime::now_utc() - time::Duration::hours(2);
        env.registry
            .touch_sandbox(idle.sandbox_id, stale)
            .await
            .unwrap();

        env.reaper.tick().await;

        let remaining = env.coordinator.list_sandboxes(user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sandbox_id, active.sandbox_id);
        assert!(!env.driver.container_ids().contains(&idle.container_id));
        assert!(env.driver.container_ids().contains(&active.container_id));
    }

    #[tokio::test]
    async fn reaping_an_already_vanished_container_succeeds() {
        let env = reaper_env().await;
        let user = make_user(&env.registry).await;

        let sandbox = env.coordinator.create_sandbox(user, None).await.unwrap();
        env.driver.remove_out_of_band(&sandbox.container_id);
        let stale = OffsetDateTime::now_utc() - time::Duration::hours(2);
        env.registry
            .touch_sandbox(sandbox.sandbox_id, stale)
            .await
            .unwrap();

        env.reaper.tick().await;
        assert!(env.coordinator.list_sandboxes(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_with_lost_containers_are_dropped_even_when_fresh() {
        let env = reaper_env().await;
        let user = make_user(&env.registry).await;

        let sandbox = env.coordinator.create_sandbox(user, None).await.unwrap();
        env.driver.remove_out_of_band(&sandbox.container_id);

        // Recently used, but its container is gone: the verification pass
        // removes the row anyway.
        env.reaper.tick().await;
        assert!(env.coordinator.list_sandboxes(user).await.unwrap().is_empty());
    }
}
