//! Controller configuration and on-disk layout
//!
//! Every namespace lives under `<data-home>/namespaces/<name>`. The
//! controller only reads the `runtime/` tree that the site renderer produces.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fs::WatcherConfig;

/// Data home used when running as root
pub const DEFAULT_ROOT_DATA_HOME: &str = "/var/lib/skupper";

/// Rendered router configuration; its presence activates a namespace
pub const ROUTER_CONFIG_FILE: &str = "skrouterd.json";

/// Network status ConfigMap written by the router's status collector
pub const NETWORK_STATUS_FILE: &str = "ConfigMap-skupper-network-status.yaml";

/// Client credentials used to reach the local router
pub const LOCAL_CLIENT_CERTS: &str = "skupper-local-client";

/// Advisory lock file guarding the namespaces directory
pub const LOCK_FILE: &str = ".lock";

const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_HEARTBEAT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for the whole controller process
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Base directory whose sub-directories are namespaces
    pub namespaces_path: PathBuf,
    /// Fixed tick of the path-existence reconciler
    pub reconcile_interval: Duration,
    /// Upper bound a single handler callback may delay the event stream
    pub dispatch_timeout: Duration,
    /// Back-off between heartbeat connection attempts
    pub heartbeat_retry_delay: Duration,
    /// Hard limit for graceful shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespaces_path: default_namespaces_path(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            heartbeat_retry_delay: DEFAULT_HEARTBEAT_RETRY_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Optional TOML overrides
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    namespaces_path: Option<PathBuf>,
    reconcile_interval_ms: Option<u64>,
    dispatch_timeout_ms: Option<u64>,
    heartbeat_retry_delay_ms: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

impl ControllerConfig {
    /// Load defaults overridden by the given TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|e| Error::ConfigError(e.to_string()))?;
        Self::default().merge(file)
    }

    fn merge(mut self, file: FileConfig) -> Result<Self> {
        if let Some(path) = file.namespaces_path {
            self.namespaces_path = path;
        }
        if let Some(ms) = file.reconcile_interval_ms {
            self.reconcile_interval = non_zero("reconcile_interval_ms", ms, Duration::from_millis)?;
        }
        if let Some(ms) = file.dispatch_timeout_ms {
            self.dispatch_timeout = non_zero("dispatch_timeout_ms", ms, Duration::from_millis)?;
        }
        if let Some(ms) = file.heartbeat_retry_delay_ms {
            self.heartbeat_retry_delay =
                non_zero("heartbeat_retry_delay_ms", ms, Duration::from_millis)?;
        }
        if let Some(secs) = file.shutdown_timeout_secs {
            self.shutdown_timeout = non_zero("shutdown_timeout_secs", secs, Duration::from_secs)?;
        }
        Ok(self)
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            reconcile_interval: self.reconcile_interval,
            dispatch_timeout: self.dispatch_timeout,
        }
    }

    pub fn lock_file(&self) -> PathBuf {
        self.namespaces_path.join(LOCK_FILE)
    }

    pub fn namespace_paths(&self, namespace: &str) -> NamespacePaths {
        NamespacePaths::new(&self.namespaces_path, namespace)
    }
}

fn non_zero(key: &str, value: u64, to_duration: fn(u64) -> Duration) -> Result<Duration> {
    if value == 0 {
        return Err(Error::ConfigError(format!("{key} must be greater than zero")));
    }
    Ok(to_duration(value))
}

/// Resolve the data home for the current user
pub fn data_home() -> PathBuf {
    resolve_data_home(
        is_root(),
        std::env::var("XDG_DATA_HOME").ok(),
        std::env::var("HOME").ok(),
    )
}

pub fn default_namespaces_path() -> PathBuf {
    data_home().join("namespaces")
}

fn resolve_data_home(root: bool, xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    if root {
        return PathBuf::from(DEFAULT_ROOT_DATA_HOME);
    }
    match xdg_data_home.filter(|v| !v.is_empty()) {
        Some(xdg) => PathBuf::from(xdg).join("skupper"),
        None => PathBuf::from(home.unwrap_or_default())
            .join(".local/share")
            .join("skupper"),
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Well-known paths of a single namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacePaths {
    root: PathBuf,
}

impl NamespacePaths {
    pub fn new(namespaces_path: &Path, namespace: &str) -> Self {
        Self {
            root: namespaces_path.join(namespace),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn router_config_dir(&self) -> PathBuf {
        self.root.join("runtime").join("router")
    }

    pub fn router_config_file(&self) -> PathBuf {
        self.router_config_dir().join(ROUTER_CONFIG_FILE)
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("runtime").join("resources")
    }

    pub fn network_status_file(&self) -> PathBuf {
        self.resources_dir().join(NETWORK_STATUS_FILE)
    }

    pub fn client_certs_dir(&self) -> PathBuf {
        self.root
            .join("runtime")
            .join("certs")
            .join(LOCAL_CLIENT_CERTS)
    }
}
