//! Messaging seam used by the heartbeat client
//!
//! The heartbeat loop only needs to open a connection, subscribe to one
//! address and wait for messages. Keeping that behind traits lets the state
//! machine run against an in-memory factory in tests.

pub mod amqp;
pub mod tls;

use async_trait::async_trait;

use crate::error::Result;
use crate::router::RouterTarget;

pub use amqp::AmqpConnectionFactory;

/// Opens connections to the local router of a namespace
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send {
    /// Attach a receiving link on `address` granting `credit` messages at a time
    async fn receiver(&mut self, address: &str, credit: u32) -> Result<Box<dyn MessageReceiver>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait MessageReceiver: Send {
    /// Wait for the next message and settle it. The content is not inspected.
    async fn receive(&mut self) -> Result<()>;

    async fn close(&mut self);
}
