use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, Entry};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ChannelError, ConsumeOptions, Delivery, DeliveryStream, MessageChannel, MessageProperties,
    QueueHandle,
};

type ConnectionId = u64;
type ConsumerId = u64;

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    body: Bytes,
    properties: MessageProperties,
    redelivered: bool,
}

#[derive(Debug)]
struct Consumer {
    id: ConsumerId,
    connection: ConnectionId,
    tag: String,
    auto_ack: bool,
    /// Most unacknowledged deliveries this consumer may hold. `None` is unbounded.
    prefetch: Option<usize>,
    in_flight: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Consumer {
    fn is_saturated(&self) -> bool {
        self.prefetch.is_some_and(|limit| self.in_flight >= limit)
    }
}

#[derive(Debug)]
struct Unacked {
    connection: ConnectionId,
    consumer: ConsumerId,
    message: StoredMessage,
}

#[derive(Debug)]
struct QueueState {
    durable: bool,
    /// Set for exclusive queues.
    owner: Option<ConnectionId>,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    unacked: HashMap<u64, Unacked>,
}

impl QueueState {
    fn new(durable: bool, owner: Option<ConnectionId>) -> Self {
        Self {
            durable,
            owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            unacked: HashMap::new(),
        }
    }

    fn handle(&self, name: &str) -> QueueHandle {
        QueueHandle::new(name, self.durable, self.owner.is_some())
    }

    fn accessible_by(&self, connection: ConnectionId) -> bool {
        self.owner.is_none_or(|owner| owner == connection)
    }
}

// Lock order: a `queues` entry may be held while touching `delivery_tags`, never the reverse.
#[derive(Debug, Default)]
struct BrokerState {
    queues: DashMap<String, QueueState, ahash::RandomState>,
    delivery_tags: DashMap<u64, String, ahash::RandomState>,
    next_connection: AtomicU64,
    next_consumer: AtomicU64,
    next_delivery_tag: AtomicU64,
}

impl BrokerState {
    /// Hand `message` to the next live consumer with prefetch room, round-robin. Gives the
    /// message back when no consumer can take it.
    fn try_deliver(
        &self,
        queue_name: &str,
        queue: &mut QueueState,
        message: StoredMessage,
    ) -> Result<(), StoredMessage> {
        let mut candidates = queue.consumers.len();
        while candidates > 0 && !queue.consumers.is_empty() {
            candidates -= 1;
            let index = queue.next_consumer % queue.consumers.len();
            let consumer = &mut queue.consumers[index];
            if consumer.is_saturated() {
                queue.next_consumer = index + 1;
                continue;
            }

            let delivery_tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1;
            let delivery = Delivery {
                delivery_tag,
                routing_key: message.routing_key.clone(),
                body: message.body.clone(),
                properties: message.properties.clone(),
                redelivered: message.redelivered,
            };

            if consumer.sender.send(delivery).is_ok() {
                if !consumer.auto_ack {
                    consumer.in_flight += 1;
                    queue.unacked.insert(
                        delivery_tag,
                        Unacked {
                            connection: consumer.connection,
                            consumer: consumer.id,
                            message,
                        },
                    );
                    self.delivery_tags
                        .insert(delivery_tag, queue_name.to_string());
                }
                queue.next_consumer = index + 1;
                return Ok(());
            }

            let gone = queue.consumers.remove(index);
            debug!(
                queue = %queue_name,
                consumer_tag = %gone.tag,
                "Removing consumer whose delivery stream was dropped"
            );
        }

        Err(message)
    }

    fn drain_ready(&self, queue_name: &str, queue: &mut QueueState) {
        while let Some(message) = queue.ready.pop_front() {
            if let Err(message) = self.try_deliver(queue_name, queue, message) {
                queue.ready.push_front(message);
                break;
            }
        }
    }

    fn settle(
        &self,
        connection: ConnectionId,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), ChannelError> {
        let queue_name = self
            .delivery_tags
            .get(&delivery_tag)
            .map(|name| name.clone())
            .ok_or(ChannelError::UnknownDeliveryTag(delivery_tag))?;

        let mut queue = self
            .queues
            .get_mut(&queue_name)
            .ok_or(ChannelError::UnknownDeliveryTag(delivery_tag))?;

        match queue.unacked.get(&delivery_tag) {
            Some(unacked) if unacked.connection == connection => {}
            _ => return Err(ChannelError::UnknownDeliveryTag(delivery_tag)),
        }

        let Some(unacked) = queue.unacked.remove(&delivery_tag) else {
            return Err(ChannelError::UnknownDeliveryTag(delivery_tag));
        };
        self.delivery_tags.remove(&delivery_tag);

        if let Some(consumer) = queue
            .consumers
            .iter_mut()
            .find(|consumer| consumer.id == unacked.consumer)
        {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
        }

        if requeue {
            let mut message = unacked.message;
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        self.drain_ready(&queue_name, &mut queue);

        Ok(())
    }

    fn cancel_consumer(&self, connection: ConnectionId, tag: &str) -> bool {
        let mut found = false;
        for mut queue in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|consumer| consumer.connection != connection || consumer.tag != tag);
            found |= queue.consumers.len() != before;
        }
        found
    }

    fn close_connection(&self, connection: ConnectionId) {
        let mut exclusive = Vec::new();

        for mut entry in self.queues.iter_mut() {
            let (name, queue) = entry.pair_mut();
            queue.consumers.retain(|consumer| consumer.connection != connection);

            if queue.owner == Some(connection) {
                exclusive.push(name.clone());
                continue;
            }

            let mut orphaned: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.connection == connection)
                .map(|(tag, _)| *tag)
                .collect();
            if orphaned.is_empty() {
                continue;
            }

            // Requeue at the head, oldest delivery first.
            orphaned.sort_unstable();
            for tag in orphaned.iter().rev() {
                if let Some(unacked) = queue.unacked.remove(tag) {
                    self.delivery_tags.remove(tag);
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }

            debug!(
                queue = %name,
                connection,
                requeued = orphaned.len(),
                "Requeued unacknowledged deliveries"
            );
            self.drain_ready(name, queue);
        }

        for name in exclusive {
            if let Some((_, queue)) = self.queues.remove(&name) {
                for tag in queue.unacked.keys() {
                    self.delivery_tags.remove(tag);
                }
                debug!(queue = %name, connection, "Deleted exclusive queue");
            }
        }
    }
}

/// A process-local broker with named queues, exclusive reply queues, round-robin consumers
/// with optional prefetch limits and manual or automatic acknowledgement.
///
/// Cloning yields another handle to the same broker. Each [`connect`](Self::connect) call
/// returns an independent connection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to the broker.
    pub fn connect(&self) -> InMemoryChannel {
        let connection = self.state.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection, "Opened in-memory broker connection");

        InMemoryChannel {
            state: Arc::clone(&self.state),
            connection,
            open: AtomicBool::new(true),
        }
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state.queues.contains_key(name)
    }

    /// Number of messages waiting for a consumer.
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state.queues.get(name).map(|queue| queue.ready.len())
    }

    /// Number of messages delivered to a consumer but not yet acknowledged.
    pub fn unacked_count(&self, name: &str) -> Option<usize> {
        self.state.queues.get(name).map(|queue| queue.unacked.len())
    }

    pub fn consumer_count(&self, name: &str) -> Option<usize> {
        self.state.queues.get(name).map(|queue| {
            queue
                .consumers
                .iter()
                .filter(|consumer| !consumer.sender.is_closed())
                .count()
        })
    }
}

/// One connection to an [`InMemoryBroker`]. Dropping it closes the connection.
#[derive(Debug)]
pub struct InMemoryChannel {
    state: Arc<BrokerState>,
    connection: ConnectionId,
    open: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.close_connection(self.connection);
            info!(connection = self.connection, "Closed in-memory broker connection");
        }
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueHandle, ChannelError> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(ChannelError::InvalidQueueName(name.to_string()));
        }

        match self.state.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let queue = entry.get();
                if !queue.accessible_by(self.connection) {
                    return Err(ChannelError::ResourceLocked(name.to_string()));
                }
                if queue.durable != durable {
                    return Err(ChannelError::PreconditionFailed {
                        queue: name.to_string(),
                        reason: format!(
                            "declared durable={durable}, existing durable={}",
                            queue.durable
                        ),
                    });
                }
                Ok(queue.handle(name))
            }

            Entry::Vacant(slot) => {
                let queue = slot.insert(QueueState::new(durable, None));
                debug!(queue = %name, durable, "Declared queue");
                Ok(queue.handle(name))
            }
        }
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueHandle, ChannelError> {
        self.ensure_open()?;

        loop {
            let name = format!("amq.gen-{}", Uuid::new_v4().simple());
            if let Entry::Vacant(slot) = self.state.queues.entry(name.clone()) {
                let queue = slot.insert(QueueState::new(false, Some(self.connection)));
                debug!(queue = %name, connection = self.connection, "Declared exclusive queue");
                return Ok(queue.handle(&name));
            }
        }
    }

    async fn publish(
        &self,
        routing_key: &str,
        body: Bytes,
        properties: MessageProperties,
    ) -> Result<(), ChannelError> {
        self.ensure_open()?;

        let Some(mut queue) = self.state.queues.get_mut(routing_key) else {
            debug!(routing_key = %routing_key, "Dropping unroutable message");
            return Ok(());
        };

        let message = StoredMessage {
            routing_key: routing_key.to_string(),
            body,
            properties,
            redelivered: false,
        };
        if let Err(message) = self.state.try_deliver(routing_key, &mut queue, message) {
            queue.ready.push_back(message);
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueHandle,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, ChannelError> {
        self.ensure_open()?;

        let name = queue.name();
        let mut state = self
            .state
            .queues
            .get_mut(name)
            .ok_or_else(|| ChannelError::QueueNotFound(name.to_string()))?;
        if !state.accessible_by(self.connection) {
            return Err(ChannelError::ResourceLocked(name.to_string()));
        }

        let tag = options
            .consumer_tag
            .unwrap_or_else(|| format!("ctag-{}.{}", self.connection, Uuid::new_v4().simple()));
        let prefetch = options.prefetch.filter(|limit| *limit > 0);
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!(
            queue = %name,
            consumer_tag = %tag,
            auto_ack = options.auto_ack,
            ?prefetch,
            "Registered consumer"
        );

        state.consumers.push(Consumer {
            id: self.state.next_consumer.fetch_add(1, Ordering::Relaxed) + 1,
            connection: self.connection,
            tag,
            auto_ack: options.auto_ack,
            prefetch,
            in_flight: 0,
            sender,
        });
        self.state.drain_ready(name, &mut state);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if !self.state.cancel_consumer(self.connection, consumer_tag) {
            return Err(ChannelError::UnknownConsumerTag(consumer_tag.to_string()));
        }
        debug!(consumer_tag = %consumer_tag, connection = self.connection, "Cancelled consumer");
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.state.settle(self.connection, delivery_tag, false)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.state.settle(self.connection, delivery_tag, requeue)
    }

    async fn close(&self) {
        self.shutdown();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
