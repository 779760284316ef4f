//! Namespace discovery
//!
//! Every directory directly under the namespaces path is a namespace with
//! exactly one running `NamespaceController`. Controllers are created when the
//! directory appears and stopped when it disappears.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, Instrument};

use super::namespace_controller::NamespaceController;
use super::state::ControllerState;
use crate::error::Result;
use crate::fs::{FsChangeHandler, PathWatcher};

pub struct NamespaceRegistry {
    base_path: PathBuf,
    state: ControllerState,
    watcher: PathWatcher,
    tracker: OnceLock<TaskTracker>,
    // held across controller start/stop; neither may call back into the registry
    controllers: Mutex<HashMap<String, NamespaceController>>,
}

impl NamespaceRegistry {
    pub fn new(state: ControllerState) -> Arc<Self> {
        Arc::new(Self {
            base_path: state.config.namespaces_path.clone(),
            watcher: PathWatcher::new("namespaces", state.config.watcher_config()),
            state,
            tracker: OnceLock::new(),
            controllers: Mutex::new(HashMap::new()),
        })
    }

    /// Scan the namespaces path, then follow it for changes until `stop`
    /// fires. Controllers run their router sessions on `tracker`, so it drains
    /// only after every namespace cascade has been torn down.
    pub fn start(self: &Arc<Self>, stop: CancellationToken, tracker: &TaskTracker) -> Result<()> {
        info!(path = %self.base_path.display(), "Starting namespace registry");
        if self.tracker.set(tracker.clone()).is_err() {
            debug!("Namespace registry already started");
        }
        self.scan();

        self.watcher.add(
            self.base_path.clone(),
            Arc::clone(self) as Arc<dyn FsChangeHandler>,
        );
        self.watcher.start(stop.clone())?;

        let registry = Arc::clone(self);
        tracker.spawn(
            async move {
                stop.cancelled().await;
                registry.shutdown();
            }
            .in_current_span(),
        );
        Ok(())
    }

    /// Sorted names of the namespaces with a running controller
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn controller_stop_signal(&self, namespace: &str) -> Option<CancellationToken> {
        self.controllers()
            .get(namespace)
            .map(NamespaceController::stop_signal)
    }

    fn controllers(&self) -> MutexGuard<'_, HashMap<String, NamespaceController>> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ensure a controller for every directory under the base path
    fn scan(&self) {
        let entries = match std::fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.base_path.display(), error = %e, "Unable to read namespaces");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.ensure_controller(&path);
            }
        }
    }

    fn ensure_controller(&self, path: &Path) {
        let Some(namespace) = namespace_name(path) else {
            return;
        };
        let mut controllers = self.controllers();
        if controllers.contains_key(&namespace) {
            return;
        }

        info!(namespace = %namespace, "Namespace added");
        let tracker = self.tracker.get().cloned().unwrap_or_default();
        let controller = NamespaceController::with_tracker(&namespace, self.state.clone(), tracker);
        if let Err(e) = controller.start() {
            error!(namespace = %namespace, error = %e, "Unable to start namespace controller");
            return;
        }
        controllers.insert(namespace, controller);
    }

    fn remove_controller(&self, path: &Path) {
        let Some(namespace) = namespace_name(path) else {
            return;
        };
        if let Some(controller) = self.controllers().remove(&namespace) {
            info!(namespace = %namespace, "Namespace removed");
            controller.stop();
        }
    }

    fn shutdown(&self) {
        let mut controllers = self.controllers();
        info!(count = controllers.len(), "Stopping namespace controllers");
        for (_, controller) in controllers.drain() {
            controller.stop();
        }
    }
}

fn namespace_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[async_trait]
impl FsChangeHandler for NamespaceRegistry {
    async fn on_base_path_added(&self, base_path: &Path) {
        debug!(path = %base_path.display(), "Namespaces path available");
        self.scan();
    }

    async fn on_create(&self, name: &Path) {
        self.ensure_controller(name);
    }

    async fn on_update(&self, _name: &Path) {}

    async fn on_remove(&self, name: &Path) {
        self.remove_controller(name);
    }

    /// Direct children that are directories, or that are gone already
    fn filter(&self, name: &Path) -> bool {
        name.parent() == Some(self.base_path.as_path()) && (name.is_dir() || !name.exists())
    }
}
