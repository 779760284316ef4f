//! AMQP 1.0 implementation of the messaging seam, backed by fe2o3-amqp

use std::sync::Arc;

use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::Body;
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Connection as AmqpConnectionBuilder, Receiver, Session};
use tracing::{debug, warn};

use super::{tls, Connection, ConnectionFactory, MessageReceiver};
use crate::error::{Error, Result};
use crate::router::RouterTarget;

/// Connects to the router over `amqps` with the namespace client credentials
#[derive(Clone, Debug)]
pub struct AmqpConnectionFactory {
    hostname: String,
}

impl AmqpConnectionFactory {
    pub fn new() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self { hostname }
    }

    fn container_id(&self, target: &RouterTarget) -> String {
        format!("nonkube-controller-{}-{}", target.namespace, self.hostname)
    }
}

impl Default for AmqpConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn messaging_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::MessagingError(format!("{context}: {e}"))
}

#[async_trait]
impl ConnectionFactory for AmqpConnectionFactory {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn Connection>> {
        let tls_config = tls::client_config(&target.tls)?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));

        let mut connection = AmqpConnectionBuilder::builder()
            .container_id(self.container_id(target))
            .rustls_connector(connector)
            .open(target.url.as_str())
            .await
            .map_err(|e| messaging_error("unable to connect", e))?;

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(messaging_error("unable to begin session", e));
            }
        };
        debug!(url = %target.url, "Connected to router");

        Ok(Box::new(AmqpConnection {
            connection,
            session,
        }))
    }
}

struct AmqpConnection {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn receiver(&mut self, address: &str, credit: u32) -> Result<Box<dyn MessageReceiver>> {
        let receiver = Receiver::builder()
            .name(format!("{address}-receiver"))
            .source(address)
            .credit_mode(CreditMode::Auto(credit))
            .attach(&mut self.session)
            .await
            .map_err(|e| messaging_error("unable to attach receiver", e))?;

        Ok(Box::new(AmqpReceiver {
            receiver: Some(receiver),
        }))
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.end().await {
            debug!(error = %e, "Error ending session");
        }
        if let Err(e) = self.connection.close().await {
            debug!(error = %e, "Error closing connection");
        }
    }
}

struct AmqpReceiver {
    receiver: Option<Receiver>,
}

#[async_trait]
impl MessageReceiver for AmqpReceiver {
    async fn receive(&mut self) -> Result<()> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| Error::MessagingError("receiver closed".into()))?;

        let delivery = receiver
            .recv::<Body<Value>>()
            .await
            .map_err(|e| messaging_error("receive failed", e))?;
        receiver
            .accept(&delivery)
            .await
            .map_err(|e| messaging_error("unable to accept delivery", e))?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.close().await {
                warn!(error = %e, "Error closing receiver");
            }
        }
    }
}
