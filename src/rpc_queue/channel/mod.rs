//! The broker surface the RPC layer is written against.
//!
//! [`MessageChannel`] covers queue declaration, publishing with the two
//! properties RPC needs (`reply_to` and `correlation_id`), consuming as a stream of
//! [`Delivery`] values, and acknowledgement. [`InMemoryBroker`] implements it in-process.

mod error;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::ChannelError;
pub use memory::{InMemoryBroker, InMemoryChannel};

/// Stream of deliveries for one consumer. Ends when the owning connection closes.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// A declared queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    name: Arc<str>,
    durable: bool,
    exclusive: bool,
}

impl QueueHandle {
    pub(crate) fn new(name: impl Into<Arc<str>>, durable: bool, exclusive: bool) -> Self {
        Self {
            name: name.into(),
            durable,
            exclusive,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Exclusive queues are usable only by the declaring connection and are deleted with it.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Message metadata carried alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
}

impl MessageProperties {
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-unique tag used to [`ack`](MessageChannel::ack) or
    /// [`nack`](MessageChannel::nack) this delivery.
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Bytes,
    pub properties: MessageProperties,
    /// Set when the message was requeued after an earlier delivery was never acknowledged.
    pub redelivered: bool,
}

/// Options for [`MessageChannel::consume`].
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Deliveries are considered acknowledged as soon as they are handed to the consumer.
    pub auto_ack: bool,
    pub consumer_tag: Option<String>,
    /// Cap on unacknowledged deliveries held by this consumer. Further messages go to other
    /// consumers or wait in the queue until an ack or nack frees a slot. `None` or `Some(0)`
    /// means no cap; ignored with `auto_ack`.
    pub prefetch: Option<usize>,
}

impl ConsumeOptions {
    pub fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            ..Self::default()
        }
    }

    pub fn manual_ack() -> Self {
        Self::default()
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = Some(prefetch);
        self
    }
}

/// A connection-scoped channel to a message broker.
///
/// Implementations serialize concurrent publishes themselves; callers may share one channel
/// across tasks behind an `Arc`.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Declare (or assert) a named queue.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueHandle, ChannelError>;

    /// Declare a non-durable queue with a broker-assigned name, exclusive to this connection.
    async fn declare_exclusive_queue(&self) -> Result<QueueHandle, ChannelError>;

    /// Publish `body` to the queue named by `routing_key`.
    ///
    /// Messages routed to a queue that does not exist are dropped, not rejected.
    async fn publish(
        &self,
        routing_key: &str,
        body: Bytes,
        properties: MessageProperties,
    ) -> Result<(), ChannelError>;

    /// Start consuming `queue`. Deliveries arrive in queue order.
    async fn consume(
        &self,
        queue: &QueueHandle,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, ChannelError>;

    /// Stop the consumer registered under `consumer_tag`. Its delivery stream yields what is
    /// already buffered and then ends; those deliveries stay unacknowledged until settled.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), ChannelError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError>;

    /// Reject a delivery, optionally putting it back at the head of its queue.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError>;

    /// Close the connection. Every delivery stream of this connection ends, unacknowledged
    /// deliveries are requeued and exclusive queues are deleted.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
