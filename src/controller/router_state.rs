use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn, Instrument};

use super::activation::ActivationCallback;
use super::heartbeat::HeartbeatClient;

/// Tracks router availability while the router configuration is present and
/// drives a nested callback from the heartbeat session state.
#[derive(Clone)]
pub struct RouterStateHandler {
    inner: Arc<Inner>,
}

struct Inner {
    heartbeat: HeartbeatClient,
    tracker: TaskTracker,
    callback: RwLock<Option<Arc<dyn ActivationCallback>>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    session: CancellationToken,
    heartbeat: JoinHandle<()>,
}

impl RouterStateHandler {
    pub fn new(heartbeat: HeartbeatClient) -> Self {
        Self::with_tracker(heartbeat, TaskTracker::new())
    }

    /// Session tasks are spawned on `tracker`, so waiting on it covers the
    /// heartbeat loop and the nested callback teardown.
    pub fn with_tracker(heartbeat: HeartbeatClient, tracker: TaskTracker) -> Self {
        Self {
            inner: Arc::new(Inner {
                heartbeat,
                tracker,
                callback: RwLock::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn set_callback(&self, callback: Arc<dyn ActivationCallback>) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Inner {
    async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        info!("Stopping");
        running.session.cancel();
        if let Err(e) = running.heartbeat.await {
            warn!(error = %e, "Heartbeat loop terminated abnormally");
        }
        info!("Stopped");
    }
}

#[async_trait]
impl ActivationCallback for RouterStateHandler {
    async fn start(&self, stop: CancellationToken) {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        info!("Starting");
        let session = CancellationToken::new();
        let callback = self
            .inner
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let inner = Arc::clone(&self.inner);
        let heartbeat_session = session.clone();
        let heartbeat = self.inner.tracker.spawn(
            async move { inner.heartbeat.run(heartbeat_session, callback).await }
                .in_current_span(),
        );

        // stop together with the owning controller
        let inner = Arc::clone(&self.inner);
        let watched_session = session.clone();
        self.inner.tracker.spawn(
            async move {
                tokio::select! {
                    _ = stop.cancelled() => {
                        info!("Parent channel closed");
                        inner.stop().await;
                    }
                    _ = watched_session.cancelled() => {}
                }
            }
            .in_current_span(),
        );

        *running = Some(Running { session, heartbeat });
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    fn id(&self) -> &str {
        "router-state"
    }
}
