use std::sync::Arc;

use super::activation::{ActivationCallback, RouterAvailabilityLogger};
use super::network_status::{NetworkStatusLogger, NetworkStatusSink};
use crate::config::ControllerConfig;
use crate::messaging::{AmqpConnectionFactory, ConnectionFactory};

type DownstreamFactory = Arc<dyn Fn(&str) -> Arc<dyn ActivationCallback> + Send + Sync>;
type NetworkStatusFactory = Arc<dyn Fn(&str) -> Arc<dyn NetworkStatusSink> + Send + Sync>;

/// Shared state for every namespace controller
#[derive(Clone)]
pub struct ControllerState {
    pub config: ControllerConfig,
    pub connection_factory: Arc<dyn ConnectionFactory>,
    downstream: DownstreamFactory,
    network_status: NetworkStatusFactory,
}

impl ControllerState {
    /// Production wiring: AMQP heartbeats, logging collaborators
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            connection_factory: Arc::new(AmqpConnectionFactory::new()),
            downstream: Arc::new(log_router_availability),
            network_status: Arc::new(log_network_status),
        }
    }

    pub fn with_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.connection_factory = factory;
        self
    }

    /// Callback started while the router of a namespace is available
    pub fn with_downstream<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn ActivationCallback> + Send + Sync + 'static,
    {
        self.downstream = Arc::new(factory);
        self
    }

    pub fn with_network_status<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn NetworkStatusSink> + Send + Sync + 'static,
    {
        self.network_status = Arc::new(factory);
        self
    }

    pub fn downstream(&self, namespace: &str) -> Arc<dyn ActivationCallback> {
        (self.downstream)(namespace)
    }

    pub fn network_status(&self, namespace: &str) -> Arc<dyn NetworkStatusSink> {
        (self.network_status)(namespace)
    }
}

fn log_router_availability(namespace: &str) -> Arc<dyn ActivationCallback> {
    Arc::new(RouterAvailabilityLogger::new(namespace))
}

fn log_network_status(_namespace: &str) -> Arc<dyn NetworkStatusSink> {
    Arc::new(NetworkStatusLogger)
}
