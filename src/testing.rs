//! Helpers shared by unit tests

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

use crate::config::{ControllerConfig, NamespacePaths};
use crate::controller::{ActivationCallback, NetworkStatusSink, SiteRecord};
use crate::error::{Error, Result};
use crate::fs::{FsChangeHandler, Operation};
use crate::messaging::{Connection, ConnectionFactory, MessageReceiver};
use crate::router::RouterTarget;

pub(crate) const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Poll `check` until it holds or `attempts` are exhausted
pub(crate) async fn retry<F: FnMut() -> bool>(attempts: usize, mut check: F) -> bool {
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
    check()
}

/// `retry` with a generous window for filesystem round-trips
pub(crate) async fn eventually<F: FnMut() -> bool>(check: F) -> bool {
    retry(30, check).await
}

type PathFilter = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// Records every callback it receives
pub(crate) struct CountingHandler {
    filter: PathFilter,
    events: Mutex<Vec<(Operation, PathBuf)>>,
}

impl CountingHandler {
    pub(crate) fn new(filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            filter: Box::new(filter),
            events: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_extension(ext: &'static str) -> Arc<Self> {
        Self::new(move |name| name.extension().is_some_and(|e| e == ext))
    }

    pub(crate) fn count(&self, operation: Operation) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    pub(crate) fn count_for(&self, operation: Operation, path: &Path) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, name)| *op == operation && name == path)
            .count()
    }

    fn record(&self, operation: Operation, name: &Path) {
        self.events
            .lock()
            .unwrap()
            .push((operation, name.to_path_buf()));
    }
}

#[async_trait]
impl FsChangeHandler for CountingHandler {
    async fn on_base_path_added(&self, base_path: &Path) {
        self.record(Operation::BasePathAdded, base_path);
    }

    async fn on_create(&self, name: &Path) {
        self.record(Operation::Create, name);
    }

    async fn on_update(&self, name: &Path) {
        self.record(Operation::Update, name);
    }

    async fn on_remove(&self, name: &Path) {
        self.record(Operation::Remove, name);
    }

    fn filter(&self, name: &Path) -> bool {
        (self.filter)(name)
    }
}

/// ActivationCallback that counts its transitions and, optionally, writes
/// them to a journal shared with other callbacks to check ordering.
pub(crate) struct CountingCallback {
    id: String,
    started: AtomicUsize,
    stopped: AtomicUsize,
    journal: Arc<Mutex<Vec<String>>>,
    stop_delay: Duration,
}

impl CountingCallback {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Self::with_journal(id, Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn with_journal(id: &str, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            journal,
            stop_delay: Duration::ZERO,
        })
    }

    /// Callback whose `stop` takes `delay` before it is counted
    pub(crate) fn slow_to_stop(id: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            journal: Arc::new(Mutex::new(Vec::new())),
            stop_delay: delay,
        })
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivationCallback for CountingCallback {
    async fn start(&self, _stop: CancellationToken) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}.start", self.id));
    }

    async fn stop(&self) {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.stopped.fetch_add(1, Ordering::SeqCst);
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}.stop", self.id));
    }

    fn id(&self) -> &str {
        &self.id
    }
}

// -----------------------------------------------------------------------------
// Fixtures
// -----------------------------------------------------------------------------

pub(crate) const SITE_ID: &str = "site-1234";

pub(crate) const ROUTER_CONFIG: &str = r#"[
    ["router", {"id": "west-router", "mode": "interior", "metadata": "{\"id\":\"site-1234\",\"version\":\"2.0.0\"}"}],
    ["listener", {"name": "@9090", "role": "normal", "port": 9090, "http": true}],
    ["listener", {"name": "skupper-local", "role": "normal", "host": "127.0.0.1", "port": 5671, "sslProfile": "skupper-local"}]
]"#;

/// Controller configuration with intervals short enough for tests
pub(crate) fn test_config(namespaces_path: &Path) -> ControllerConfig {
    ControllerConfig {
        namespaces_path: namespaces_path.to_path_buf(),
        reconcile_interval: Duration::from_millis(200),
        dispatch_timeout: Duration::from_millis(100),
        heartbeat_retry_delay: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
    }
}

/// Render a router configuration for the namespace
pub(crate) fn write_router_config(paths: &NamespacePaths) {
    std::fs::create_dir_all(paths.router_config_dir()).unwrap();
    std::fs::write(paths.router_config_file(), ROUTER_CONFIG).unwrap();
}

fn network_status_json() -> serde_json::Value {
    json!({
        "addresses": [{"name": "listener-one-key", "protocol": "tcp"}],
        "siteStatus": [
            {
                "site": {
                    "identity": "site-id",
                    "name": "site-name",
                    "namespace": "default",
                    "platform": "podman",
                    "version": "version"
                },
                "routerStatus": [{
                    "links": [
                        {"name": "link-one", "linkCost": 1, "status": "UP", "role": "inter-router",
                         "peer": "other-site-link-access-identity-inter-router"},
                        {"name": "dangling", "status": "up", "peer": "unknown-access-point"}
                    ],
                    "accessPoints": [
                        {"identity": "link-access-one-identity-inter-router"},
                        {"identity": "link-access-one-identity-edge"}
                    ],
                    "listeners": [
                        {"name": "listener-one", "address": "listener-one-key"},
                        {"name": "listener-two", "address": "listener-two-key"}
                    ],
                    "connectors": [
                        {"destHost": "connector-one-host", "address": "connector-one-key"}
                    ]
                }]
            },
            {
                "site": {
                    "identity": "other-site-id",
                    "name": "other-site-name",
                    "namespace": "default",
                    "platform": "linux",
                    "version": "version"
                },
                "routerStatus": [{
                    "accessPoints": [
                        {"identity": "other-site-link-access-identity-inter-router"}
                    ],
                    "listeners": [{"name": "listener-one", "address": "connector-one-key"}],
                    "connectors": [{"destHost": "connector-one-host", "address": "listener-one-key"}]
                }]
            }
        ]
    })
}

/// Network status ConfigMap with two linked sites
pub(crate) fn network_status_config_map() -> String {
    let status = network_status_json().to_string();
    let config_map = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "skupper-network-status"},
        "data": {"NetworkStatus": status}
    });
    serde_yaml::to_string(&config_map).unwrap()
}

// -----------------------------------------------------------------------------
// Messaging
// -----------------------------------------------------------------------------

type Feed = mpsc::UnboundedSender<Result<()>>;

/// In-memory router: every attached receiver gets a feed the test pushes
/// heartbeats or failures into.
#[derive(Default)]
pub(crate) struct MockConnectionFactory {
    targets: Mutex<Vec<RouterTarget>>,
    feeds: Arc<Mutex<Vec<Feed>>>,
    refuse_connections: AtomicBool,
    links: Arc<LinkPolicy>,
}

/// Switch for receiver attach failures, shared with every mock connection
#[derive(Default)]
struct LinkPolicy {
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl MockConnectionFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Receivers attached so far
    pub(crate) fn receivers(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }

    /// Connection attempts so far, refused ones included
    pub(crate) fn connects(&self) -> usize {
        self.targets.lock().unwrap().len()
    }

    /// Receiver attach attempts so far, refused ones included
    pub(crate) fn attaches(&self) -> usize {
        self.links.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn refuse_links(&self, refuse: bool) {
        self.links.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn last_target(&self) -> Option<RouterTarget> {
        self.targets.lock().unwrap().last().cloned()
    }

    /// Deliver a heartbeat on the most recent receiver
    pub(crate) fn heartbeat(&self) -> bool {
        self.push(Ok(()))
    }

    /// Fail the most recent receiver
    pub(crate) fn fail(&self) -> bool {
        self.push(Err(Error::MessagingError("link detached".into())))
    }

    fn push(&self, item: Result<()>) -> bool {
        match self.feeds.lock().unwrap().last() {
            Some(feed) => feed.send(item).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn Connection>> {
        self.targets.lock().unwrap().push(target.clone());
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(Error::MessagingError("connection refused".into()));
        }
        Ok(Box::new(MockConnection {
            feeds: Arc::clone(&self.feeds),
            links: Arc::clone(&self.links),
        }))
    }
}

struct MockConnection {
    feeds: Arc<Mutex<Vec<Feed>>>,
    links: Arc<LinkPolicy>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn receiver(&mut self, _address: &str, _credit: u32) -> Result<Box<dyn MessageReceiver>> {
        self.links.attempts.fetch_add(1, Ordering::SeqCst);
        if self.links.refuse.load(Ordering::SeqCst) {
            return Err(Error::MessagingError("link refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        Ok(Box::new(MockReceiver { feed: rx }))
    }

    async fn close(&mut self) {}
}

struct MockReceiver {
    feed: mpsc::UnboundedReceiver<Result<()>>,
}

#[async_trait]
impl MessageReceiver for MockReceiver {
    async fn receive(&mut self) -> Result<()> {
        match self.feed.recv().await {
            Some(item) => item,
            None => Err(Error::MessagingError("receiver closed".into())),
        }
    }

    async fn close(&mut self) {
        self.feed.close();
    }
}

// -----------------------------------------------------------------------------
// Network status sink
// -----------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingSink {
    updates: Mutex<Vec<Vec<SiteRecord>>>,
    resets: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Site count of the latest update
    pub(crate) fn last_sites(&self) -> Option<usize> {
        self.updates.lock().unwrap().last().map(Vec::len)
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkStatusSink for RecordingSink {
    async fn update(&self, records: Vec<SiteRecord>) {
        self.updates.lock().unwrap().push(records);
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// -----------------------------------------------------------------------------
// Log capture
// -----------------------------------------------------------------------------

/// Records `(target, message)` of every event on the current thread.
/// Only usable with the current-thread test runtime.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl LogCapture {
    pub(crate) fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Events with `message` emitted from a module path ending in `module`
    pub(crate) fn count(&self, module: &str, message: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, msg)| target.ends_with(module) && msg == message)
            .count()
    }

    pub(crate) fn contains(&self, message: &str) -> bool {
        self.events.lock().unwrap().iter().any(|(_, msg)| msg == message)
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((event.metadata().target().to_string(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}
