//! Activation driven by the rendered router configuration
//!
//! The namespace is `Active` while `skrouterd.json` exists. Entering `Active`
//! starts every registered callback in registration order, leaving it stops
//! them in the same order.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::activation::ActivationCallback;
use crate::config::ROUTER_CONFIG_FILE;
use crate::fs::FsChangeHandler;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Active,
}

pub struct RouterConfigHandler {
    stop: CancellationToken,
    state: Mutex<ActivationState>,
    callbacks: RwLock<Vec<Arc<dyn ActivationCallback>>>,
}

impl RouterConfigHandler {
    /// `stop` is handed to every callback started by this handler
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            stop,
            state: Mutex::new(ActivationState::Inactive),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_callback(&self, callback: Arc<dyn ActivationCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub async fn state(&self) -> ActivationState {
        *self.state.lock().await
    }

    fn callbacks(&self) -> Vec<Arc<dyn ActivationCallback>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn activate(&self) {
        let mut state = self.state.lock().await;
        if *state == ActivationState::Active {
            debug!("Router config already active");
            return;
        }
        *state = ActivationState::Active;
        for callback in self.callbacks() {
            info!(callback = callback.id(), "Starting callback");
            callback.start(self.stop.clone()).await;
        }
    }

    async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        if *state == ActivationState::Inactive {
            debug!("Router config already inactive");
            return;
        }
        *state = ActivationState::Inactive;
        for callback in self.callbacks() {
            info!(callback = callback.id(), "Stopping callback");
            callback.stop().await;
        }
    }
}

#[async_trait]
impl FsChangeHandler for RouterConfigHandler {
    async fn on_base_path_added(&self, base_path: &Path) {
        let config_file = base_path.join(ROUTER_CONFIG_FILE);
        if config_file.exists() {
            self.on_create(&config_file).await;
        }
    }

    async fn on_create(&self, name: &Path) {
        info!(path = %name.display(), "Router config available");
        self.activate().await;
    }

    async fn on_update(&self, name: &Path) {
        // the router reloads its own configuration; activation is unchanged
        debug!(path = %name.display(), "Router config updated");
    }

    async fn on_remove(&self, name: &Path) {
        info!(path = %name.display(), "Router config removed");
        self.deactivate().await;
    }

    fn filter(&self, name: &Path) -> bool {
        name.file_name().is_some_and(|f| f == ROUTER_CONFIG_FILE)
    }
}
