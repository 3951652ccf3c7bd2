//! Periodic sync tasks
//!
//! One tokio task per engine. A tick that arrives while a cycle is still
//! running is skipped, and a running cycle always completes before the task
//! reacts to shutdown.

use crate::core_log::sync::engine::SyncEngine;
use crate::shutdown::{ShutdownCoordinator, ShutdownToken};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

struct ScheduledSync {
    engine: Arc<SyncEngine>,
    interval: Duration,
}

/// Runs every registered engine on its own interval
#[derive(Default)]
pub struct SyncScheduler {
    tasks: Vec<ScheduledSync>,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, engine: Arc<SyncEngine>, interval: Duration) {
        self.tasks.push(ScheduledSync { engine, interval });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn all tasks; each stops when `shutdown` fires
    pub fn spawn(self, shutdown: &ShutdownCoordinator) -> Vec<JoinHandle<()>> {
        self.tasks
            .into_iter()
            .map(|task| {
                let token = shutdown.token(format!("sync:{}", task.engine.name()));
                tokio::spawn(run_scheduled(task, token))
            })
            .collect()
    }
}

async fn run_scheduled(task: ScheduledSync, mut token: ShutdownToken) {
    let mut ticker = tokio::time::interval(task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(sync = %task.engine.name(), interval = ?task.interval, "sync task started");

    loop {
        tokio::select! {
            _ = token.wait() => break,
            _ = ticker.tick() => {
                task.engine.run_cycle().await;
            }
        }
    }

    info!(sync = %task.engine.name(), "sync task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_log::sync::discovery::StaticDiscovery;
    use crate::core_log::sync::endpoint::Command;
    use crate::core_log::sync::engine::SyncEngineConfig;
    use crate::test_utils::{eventually, events, store_in, LoopbackConnectionFactory, DEFAULT_TEST_TIMEOUT};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let (local_dir, remote_dir) = (tempdir().unwrap(), tempdir().unwrap());
        let local = store_in(local_dir.path());
        let remote = store_in(remote_dir.path());
        let network = Arc::new(LoopbackConnectionFactory::new(remote.clone()));

        let engine = Arc::new(SyncEngine::new(
            SyncEngineConfig::new("scheduled", "auditlog"),
            local.clone(),
            Arc::new(StaticDiscovery::new("http://server/")),
            network.clone(),
        ));

        let mut scheduler = SyncScheduler::new();
        scheduler.add(engine, Duration::from_millis(20));
        assert_eq!(scheduler.len(), 1);

        let shutdown = ShutdownCoordinator::new(DEFAULT_TEST_TIMEOUT);
        let handles = scheduler.spawn(&shutdown);

        local.put(&events("t", 1, &[1, 2])).unwrap();
        assert!(eventually(DEFAULT_TEST_TIMEOUT, || remote.get_all("t", 1).map(|e| e.len() == 2).unwrap_or(false)).await);
        // Later cycles keep querying.
        let queries = network.calls(Command::Query);
        assert!(eventually(DEFAULT_TEST_TIMEOUT, || network.calls(Command::Query) > queries).await);

        shutdown.shutdown().await;
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(shutdown.active_components(), 0);

        let after = network.total_calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(network.total_calls(), after);
    }
}
