//! Error types for the nonkube controller
//!
//! Inside the reconciliation engine no error is fatal: callers log them and
//! treat the affected component as down. Only process startup (lock file,
//! namespaces directory) propagates errors to `main`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem access failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// OS-level watch could not be created or updated
    #[error("File watcher error: {0}")]
    WatchError(#[from] notify::Error),

    /// Invalid controller configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Rendered router configuration is missing data needed by the controller
    #[error("Router configuration error: {0}")]
    RouterConfigError(String),

    /// Client credentials could not be loaded
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Connecting, subscribing or receiving from the router failed
    #[error("Messaging error: {0}")]
    MessagingError(String),

    /// Another controller process holds the namespaces lock
    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
