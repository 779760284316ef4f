//! Path watcher
//!
//! Turns OS file notifications into `FsChangeHandler` callbacks. The OS
//! facility cannot watch paths that do not exist yet, so a reconciler adds
//! and removes OS watches as registered paths come and go, replaying the
//! existing content of a path whenever a watch is (re)established.
//!
//! Three tasks share the registration table:
//! - the event consumer, matching OS events against registered paths
//! - the path reconciler, owning the OS watcher and the set of active watches
//! - the dispatch worker, invoking handler callbacks one at a time with a
//!   bounded timeout

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::Result;

const TRIGGER_QUEUE_SIZE: usize = 256;

/// Consumer of file events for a watched path.
///
/// `filter` is evaluated on the event consumer and must stay cheap.
#[async_trait]
pub trait FsChangeHandler: Send + Sync {
    /// The watched path itself started to exist
    async fn on_base_path_added(&self, base_path: &Path);
    async fn on_create(&self, name: &Path);
    async fn on_update(&self, name: &Path);
    async fn on_remove(&self, name: &Path);
    fn filter(&self, name: &Path) -> bool;
}

/// Callback kind queued for the dispatch worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    BasePathAdded,
    Create,
    Update,
    Remove,
}

/// Timing knobs of a `PathWatcher`
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub reconcile_interval: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(1),
            dispatch_timeout: Duration::from_millis(100),
        }
    }
}

struct Trigger {
    handler: Arc<dyn FsChangeHandler>,
    operation: Operation,
    name: PathBuf,
}

impl Trigger {
    async fn fire(self) {
        match self.operation {
            Operation::BasePathAdded => self.handler.on_base_path_added(&self.name).await,
            Operation::Create => self.handler.on_create(&self.name).await,
            Operation::Update => self.handler.on_update(&self.name).await,
            Operation::Remove => self.handler.on_remove(&self.name).await,
        }
    }
}

enum Refresh {
    /// Registrations changed
    All,
    /// A watched root was removed; forget its OS watch and check it again
    Requeue(PathBuf),
}

type Registrations = BTreeMap<PathBuf, Vec<Arc<dyn FsChangeHandler>>>;
type TriggerSender = mpsc::Sender<Trigger>;

/// Watches registered paths and notifies their handlers.
///
/// Cloning yields another handle to the same watcher.
#[derive(Clone)]
pub struct PathWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    owner: String,
    config: WatcherConfig,
    registrations: RwLock<Registrations>,
    running: Mutex<Option<mpsc::UnboundedSender<Refresh>>>,
}

impl PathWatcher {
    pub fn new(owner: impl Into<String>, config: WatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                owner: owner.into(),
                config,
                registrations: RwLock::new(BTreeMap::new()),
                running: Mutex::new(None),
            }),
        }
    }

    /// Register `handler` for `path`. Registering a path twice accumulates
    /// handlers. A running watcher reconciles immediately.
    pub fn add(&self, path: impl Into<PathBuf>, handler: Arc<dyn FsChangeHandler>) {
        let path = path.into();
        info!(owner = %self.inner.owner, path = %path.display(), "Adding new handler");
        self.inner
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path)
            .or_default()
            .push(handler);

        if let Some(refresh) = self.inner.running().as_ref() {
            let _ = refresh.send(Refresh::All);
        }
    }

    /// Launch the watcher tasks. Calling it while running is a no-op.
    pub fn start(&self, stop: CancellationToken) -> Result<()> {
        let mut running = self.inner.running();
        if running.is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let os_watcher = notify::recommended_watcher(move |res| {
            // receiver gone means the watcher is shutting down
            let _ = event_tx.send(res);
        })?;
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_SIZE);
        *running = Some(refresh_tx.clone());
        drop(running);

        let span = info_span!("path_watcher", owner = %self.inner.owner);
        tokio::spawn(
            Arc::clone(&self.inner)
                .process_events(event_rx, trigger_tx.clone(), refresh_tx, stop.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.inner)
                .monitor_paths(os_watcher, refresh_rx, trigger_tx, stop.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.inner)
                .dispatch_triggers(trigger_rx, stop)
                .instrument(span),
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running().is_some()
    }

    /// Registered paths, in reconciliation order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Refresh>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<(PathBuf, Vec<Arc<dyn FsChangeHandler>>)> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, handlers)| (path.clone(), handlers.clone()))
            .collect()
    }

    fn is_registered(&self, path: &Path) -> bool {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    /// Handlers of every registered path containing `name` that accept it
    fn matching_handlers(&self, name: &Path) -> Vec<Arc<dyn FsChangeHandler>> {
        let registrations = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        registrations
            .iter()
            .filter(|(base, _)| name.starts_with(base))
            .flat_map(|(_, handlers)| handlers.iter())
            .filter(|handler| handler.filter(name))
            .cloned()
            .collect()
    }

    async fn process_events(
        self: Arc<Self>,
        mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        trigger_tx: TriggerSender,
        refresh_tx: mpsc::UnboundedSender<Refresh>,
        stop: CancellationToken,
    ) {
        loop {
            let result = tokio::select! {
                _ = stop.cancelled() => break,
                result = event_rx.recv() => match result {
                    Some(result) => result,
                    None => break,
                },
            };
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "File watcher error");
                    continue;
                }
            };
            let Some(operation) = classify(&event.kind) else {
                continue;
            };

            for path in event.paths {
                for handler in self.matching_handlers(&path) {
                    debug!(path = %path.display(), ?operation, "Queueing event");
                    let trigger = Trigger {
                        handler,
                        operation,
                        name: path.clone(),
                    };
                    if trigger_tx.send(trigger).await.is_err() {
                        return;
                    }
                }
                // a removed root must be picked up again once it reappears
                if operation == Operation::Remove && self.is_registered(&path) {
                    let _ = refresh_tx.send(Refresh::Requeue(path));
                }
            }
        }
        debug!("Stop processing events");
    }

    async fn monitor_paths(
        self: Arc<Self>,
        mut os_watcher: RecommendedWatcher,
        mut refresh_rx: mpsc::UnboundedReceiver<Refresh>,
        trigger_tx: TriggerSender,
        stop: CancellationToken,
    ) {
        info!("Start monitoring paths");
        let mut active = HashSet::new();
        // the first tick completes immediately and performs the startup pass
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(refresh) = refresh_rx.recv() => {
                    if let Refresh::Requeue(path) = refresh {
                        release_watch(&mut os_watcher, &mut active, &path);
                    }
                }
                _ = ticker.tick() => {}
            }
            if self
                .manage_watchers(&mut os_watcher, &mut active, &trigger_tx)
                .await
                .is_err()
            {
                break;
            }
        }

        *self.running() = None;
        info!("Stop monitoring paths");
    }

    /// Reconcile OS watches with the registration table and the filesystem.
    /// Fails only when the dispatch worker is gone.
    async fn manage_watchers(
        &self,
        os_watcher: &mut RecommendedWatcher,
        active: &mut HashSet<PathBuf>,
        trigger_tx: &TriggerSender,
    ) -> std::result::Result<(), mpsc::error::SendError<Trigger>> {
        for (path, handlers) in self.snapshot() {
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    release_watch(os_watcher, active, &path);
                    continue;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error verifying monitored path");
                    continue;
                }
            };
            if active.contains(&path) {
                continue;
            }
            if let Err(e) = os_watcher.watch(&path, RecursiveMode::NonRecursive) {
                error!(path = %path.display(), error = %e, "Error adding monitored path");
                continue;
            }
            active.insert(path.clone());
            debug!(path = %path.display(), "Monitored path added");

            let existing = if metadata.is_dir() {
                list_entries(&path)
            } else {
                vec![path.clone()]
            };
            for handler in handlers {
                trigger_tx
                    .send(Trigger {
                        handler: Arc::clone(&handler),
                        operation: Operation::BasePathAdded,
                        name: path.clone(),
                    })
                    .await?;
                for entry in existing.iter().filter(|entry| handler.filter(entry)) {
                    trigger_tx
                        .send(Trigger {
                            handler: Arc::clone(&handler),
                            operation: Operation::Create,
                            name: entry.clone(),
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn dispatch_triggers(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<Trigger>,
        stop: CancellationToken,
    ) {
        let timeout = self.config.dispatch_timeout;
        loop {
            let trigger = tokio::select! {
                _ = stop.cancelled() => break,
                trigger = trigger_rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            let operation = trigger.operation;
            let name = trigger.name.clone();
            let mut task = tokio::spawn(trigger.fire().in_current_span());

            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(path = %name.display(), ?operation, error = %e, "Event trigger failed");
                }
                Err(_) => {
                    // the callback keeps running detached
                    warn!(path = %name.display(), ?operation, "Event trigger timed out");
                }
            }
        }
        debug!("Stop dispatching events");
    }
}

fn release_watch(os_watcher: &mut RecommendedWatcher, active: &mut HashSet<PathBuf>, path: &Path) {
    if !active.remove(path) {
        return;
    }
    // the OS usually drops the watch together with the path
    if let Err(e) = os_watcher.unwatch(path) {
        debug!(path = %path.display(), error = %e, "Watch already released");
    }
    debug!(path = %path.display(), "Monitored path removed");
}

fn list_entries(path: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Error reading monitored path");
            return Vec::new();
        }
    };
    let mut names: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error reading monitored path");
                None
            }
        })
        .collect();
    names.sort();
    names
}

/// Map a notify event kind to the handler callback it triggers
fn classify(kind: &EventKind) -> Option<Operation> {
    match kind {
        EventKind::Create(_) => Some(Operation::Create),
        EventKind::Remove(_) => Some(Operation::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Operation::Create),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Operation::Remove),
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            None
        }
        EventKind::Modify(_) => Some(Operation::Update),
        _ => None,
    }
}
