//! Skupper nonkube controller: filesystem-driven reconciliation for
//! non-Kubernetes sites
//!
//! This crate watches the namespaces directory of a site host, runs one
//! controller per namespace and activates the components that depend on the
//! local router while its configuration is rendered and it answers heartbeats.

pub mod config;
pub mod controller;
pub mod error;
pub mod fs;
pub mod messaging;
pub mod router;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use crate::error::{Error, Result};
