//! Controller module for nonkube namespaces
//! This module contains namespace discovery, the per-namespace controller
//! and the activation cascade driven by the router configuration and the
//! router heartbeats.

mod activation;
mod heartbeat;
mod namespace_controller;
mod namespace_registry;
pub mod network_status;
mod router_config;
mod router_state;
mod state;

pub use activation::{ActivationCallback, RouterAvailabilityLogger};
pub use heartbeat::HeartbeatClient;
pub use namespace_controller::NamespaceController;
pub use namespace_registry::NamespaceRegistry;
pub use network_status::{NetworkStatusHandler, NetworkStatusSink, SiteRecord};
pub use router_config::{ActivationState, RouterConfigHandler};
pub use router_state::RouterStateHandler;
pub use state::ControllerState;
