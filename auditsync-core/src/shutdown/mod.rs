//! Graceful shutdown coordinator
//!
//! Long-running components (the sync endpoint, each scheduled sync task)
//! hold a [`ShutdownToken`]. `shutdown()` broadcasts the signal and waits,
//! bounded by the configured timeout, until every token has been dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

#[derive(Default)]
struct Components {
    active: AtomicUsize,
    idle: Notify,
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Components>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// `timeout` bounds how long `shutdown` waits for components to finish
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: RwLock::new(ShutdownState::Running),
            shutdown_tx,
            components: Arc::new(Components::default()),
            timeout,
        }
    }

    /// Register a component; it must drop the token once it stopped
    pub fn token(&self, component: impl Into<String>) -> ShutdownToken {
        self.components.active.fetch_add(1, Ordering::SeqCst);
        ShutdownToken {
            component: component.into(),
            rx: self.shutdown_tx.subscribe(),
            components: self.components.clone(),
        }
    }

    pub fn active_components(&self) -> usize {
        self.components.active.load(Ordering::SeqCst)
    }

    /// Broadcast shutdown and wait for registered components to stop
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                warn!("Shutdown already in progress");
                return;
            }
            *state = ShutdownState::ShuttingDown;
        }

        info!(components = self.active_components(), "Initiating graceful shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("No component listening for shutdown");
        }

        let components = self.components.clone();
        let drained = tokio::time::timeout(self.timeout, async move {
            while components.active.load(Ordering::SeqCst) > 0 {
                components.idle.notified().await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.active_components(),
                timeout = ?self.timeout,
                "Components still running after shutdown timeout"
            );
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// A registered component's view of the shutdown signal
pub struct ShutdownToken {
    component: String,
    rx: broadcast::Receiver<()>,
    components: Arc<Components>,
}

impl ShutdownToken {
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&mut self) {
        // Closed or lagged both mean the signal was sent.
        let _ = self.rx.recv().await;
        debug!(component = %self.component, "received shutdown signal");
    }
}

impl Drop for ShutdownToken {
    fn drop(&mut self) {
        self.components.active.fetch_sub(1, Ordering::SeqCst);
        self.components.idle.notify_one();
    }
}

/// Install signal handlers for graceful shutdown
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;
    });
}

/// Install signal handlers for graceful shutdown (Windows)
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C");
        coordinator.shutdown().await;
    });
}
