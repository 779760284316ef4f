use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, Span};

use super::heartbeat::HeartbeatClient;
use super::network_status::NetworkStatusHandler;
use super::router_config::RouterConfigHandler;
use super::router_state::RouterStateHandler;
use super::state::ControllerState;
use crate::config::NamespacePaths;
use crate::error::Result;
use crate::fs::PathWatcher;

/// Reconciles the runtime tree of a single namespace.
///
/// Owns its stop signal and a path watcher scoped to the namespace:
/// `runtime/router` drives router activation, `runtime/resources` the
/// network status.
pub struct NamespaceController {
    namespace: String,
    paths: NamespacePaths,
    state: ControllerState,
    stop: CancellationToken,
    tracker: TaskTracker,
    watcher: PathWatcher,
    span: Span,
    started: AtomicBool,
}

impl NamespaceController {
    pub fn new(namespace: &str, state: ControllerState) -> Self {
        Self::with_tracker(namespace, state, TaskTracker::new())
    }

    /// Router sessions of this namespace run on `tracker`; once stopped,
    /// waiting on it covers their teardown.
    pub fn with_tracker(namespace: &str, state: ControllerState, tracker: TaskTracker) -> Self {
        let paths = state.config.namespace_paths(namespace);
        let watcher = PathWatcher::new(namespace, state.config.watcher_config());
        Self {
            namespace: namespace.to_string(),
            paths,
            stop: CancellationToken::new(),
            tracker,
            watcher,
            span: info_span!("namespace", namespace = %namespace),
            started: AtomicBool::new(false),
            state,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Build the handler graph and start watching. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _entered = self.span.enter();
        info!("Starting namespace controller");

        let heartbeat = HeartbeatClient::new(
            &self.namespace,
            self.paths.clone(),
            Arc::clone(&self.state.connection_factory),
            self.state.config.heartbeat_retry_delay,
        );
        let router_state = RouterStateHandler::with_tracker(heartbeat, self.tracker.clone());
        router_state.set_callback(self.state.downstream(&self.namespace));

        let router_config = RouterConfigHandler::new(self.stop.clone());
        router_config.add_callback(Arc::new(router_state));
        self.watcher
            .add(self.paths.router_config_dir(), Arc::new(router_config));

        let network_status = NetworkStatusHandler::new(self.state.network_status(&self.namespace));
        network_status.watch_stop(self.stop.clone());
        self.watcher
            .add(self.paths.resources_dir(), Arc::new(network_status));

        self.watcher.start(self.stop.clone())
    }

    pub fn stop(&self) {
        let _entered = self.span.enter();
        if !self.stop.is_cancelled() {
            info!("Stopping namespace controller");
            self.stop.cancel();
        }
    }
}
