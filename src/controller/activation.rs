use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A component whose lifecycle is driven from outside.
///
/// Implementations must tolerate `start` while already started and `stop`
/// while already stopped.
#[async_trait]
pub trait ActivationCallback: Send + Sync {
    async fn start(&self, stop: CancellationToken);
    async fn stop(&self);
    fn id(&self) -> &str;
}

/// Default downstream callback: reports router availability in the log
pub struct RouterAvailabilityLogger {
    namespace: String,
}

impl RouterAvailabilityLogger {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ActivationCallback for RouterAvailabilityLogger {
    async fn start(&self, _stop: CancellationToken) {
        info!(namespace = %self.namespace, "Router is available");
    }

    async fn stop(&self) {
        info!(namespace = %self.namespace, "Router is unavailable");
    }

    fn id(&self) -> &str {
        "router-availability"
    }
}
