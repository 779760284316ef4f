//! Router heartbeat subscription
//!
//! The client keeps a receiver attached to the site heartbeat address and
//! derives router availability from it: a received message means the router
//! is up, any failure to resolve, connect, attach or receive means it is down.
//! Every up transition starts the downstream callback once, every down
//! transition stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activation::ActivationCallback;
use crate::config::NamespacePaths;
use crate::error::Result;
use crate::messaging::{Connection, ConnectionFactory};
use crate::router::RouterTarget;

const HEARTBEAT_CREDIT: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connected,
}

pub struct HeartbeatClient {
    namespace: String,
    paths: NamespacePaths,
    factory: Arc<dyn ConnectionFactory>,
    retry_delay: Duration,
}

/// State of one run of the heartbeat loop
struct Session<'a> {
    stop: &'a CancellationToken,
    callback: Option<Arc<dyn ActivationCallback>>,
    state: SessionState,
}

impl Session<'_> {
    async fn router_up(&mut self) {
        if self.state == SessionState::Connected {
            return;
        }
        self.state = SessionState::Connected;
        info!("Router is up");
        if let Some(callback) = &self.callback {
            callback.start(self.stop.clone()).await;
        }
    }

    async fn router_down(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        info!("Router is down");
        if let Some(callback) = &self.callback {
            callback.stop().await;
        }
    }
}

impl HeartbeatClient {
    pub fn new(
        namespace: &str,
        paths: NamespacePaths,
        factory: Arc<dyn ConnectionFactory>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            paths,
            factory,
            retry_delay,
        }
    }

    /// Run until `stop` fires, reconnecting after every failure
    pub async fn run(&self, stop: CancellationToken, callback: Option<Arc<dyn ActivationCallback>>) {
        info!("Starting");
        let mut session = Session {
            stop: &stop,
            callback,
            state: SessionState::Disconnected,
        };

        while !stop.is_cancelled() {
            match self.connect_and_receive(&mut session).await {
                // only returned once the stop signal fired
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, retry_in = ?self.retry_delay, "Heartbeat session failed");
                    session.router_down().await;
                }
            }
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        session.router_down().await;
        info!("Exiting");
    }

    async fn connect_and_receive(&self, session: &mut Session<'_>) -> Result<()> {
        let target = RouterTarget::resolve(&self.namespace, &self.paths)?;
        debug!(url = %target.url, address = %target.address, "Connecting to router");

        let mut connection = tokio::select! {
            _ = session.stop.cancelled() => return Ok(()),
            connection = self.factory.connect(&target) => connection?,
        };
        let result = self
            .receive_heartbeats(connection.as_mut(), &target, session)
            .await;
        connection.close().await;
        result
    }

    async fn receive_heartbeats(
        &self,
        connection: &mut dyn Connection,
        target: &RouterTarget,
        session: &mut Session<'_>,
    ) -> Result<()> {
        let stop = session.stop;
        let mut receiver = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            receiver = connection.receiver(&target.address, HEARTBEAT_CREDIT) => receiver?,
        };

        let result = loop {
            tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                received = receiver.receive() => match received {
                    Ok(()) => {
                        debug!("Heartbeat received");
                        session.router_up().await;
                    }
                    Err(e) => break Err(e),
                },
            }
        };
        receiver.close().await;
        result
    }
}
