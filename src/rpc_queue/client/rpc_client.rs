use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::rpc_queue::channel::{
    ConsumeOptions, DeliveryStream, MessageChannel, MessageProperties, QueueHandle,
};
use crate::rpc_queue::client::config::RpcClientConfig;
use crate::rpc_queue::correlation::CorrelationId;
use crate::rpc_queue::envelope::{JSON_CONTENT_TYPE, ReplyEnvelope};
use crate::rpc_queue::error::RpcError;
use crate::rpc_queue::registry::CorrelationRegistry;

/// An RPC client that issues blocking-style calls over a message queue.
///
/// The client handles:
/// - Declaring one exclusive reply queue for its whole lifetime
/// - Publishing requests to the work queue with `reply_to` and a fresh correlation id
/// - Routing each reply to exactly the call that issued the matching request
/// - Timeouts, abandoned calls and connection loss
///
/// Any number of calls may be in flight at once; they share the reply queue.
///
/// # Example
///
/// ```ignore
/// use ocr_rpc_gateway::rpc_queue::{InMemoryBroker, RpcClient, RpcClientConfig};
///
/// let broker = InMemoryBroker::new();
/// let config = RpcClientConfig::builder().work_queue("ocr_service").build();
/// let client = RpcClient::connect(Arc::new(broker.connect()), config).await?;
///
/// let reply: serde_json::Value = client
///     .call(&json!({"doc_id": "abc"}), Duration::from_secs(5))
///     .await?;
/// ```
pub struct RpcClient {
    channel: Arc<dyn MessageChannel>,
    registry: Arc<CorrelationRegistry>,
    reply_queue: QueueHandle,
    connected: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
    config: RpcClientConfig,
}

impl RpcClient {
    /// Create a client on `channel`.
    ///
    /// This method:
    /// 1. Declares the durable work queue (unless disabled in the config)
    /// 2. Declares the exclusive reply queue
    /// 3. Starts the reply-dispatch task consuming that queue
    ///
    /// # Errors
    ///
    /// Returns an error if any broker operation fails.
    pub async fn connect(
        channel: Arc<dyn MessageChannel>,
        config: RpcClientConfig,
    ) -> Result<Self, RpcError> {
        if config.declare_work_queue {
            channel.declare_queue(&config.work_queue, true).await?;
        }

        let reply_queue = channel.declare_exclusive_queue().await?;
        let replies = channel
            .consume(&reply_queue, ConsumeOptions::auto_ack())
            .await?;

        let registry = Arc::new(CorrelationRegistry::new());
        let connected = Arc::new(AtomicBool::new(true));
        let dispatcher = tokio::spawn(dispatch_replies(
            replies,
            Arc::clone(&registry),
            Arc::clone(&connected),
            reply_queue.clone(),
        ));

        info!(
            work_queue = %config.work_queue,
            reply_queue = %reply_queue,
            "RPC client connected"
        );

        Ok(Self {
            channel,
            registry,
            reply_queue,
            connected,
            dispatcher,
            config,
        })
    }

    /// Issue a call and decode the reply payload as `Resp`.
    ///
    /// # Errors
    ///
    /// * [`RpcError::Timeout`] if no reply arrives within `timeout`
    /// * [`RpcError::Remote`] if the worker replied with an error
    /// * [`RpcError::Transport`] / [`RpcError::ConnectionClosed`] on broker failure
    /// * [`RpcError::Encode`] / [`RpcError::Decode`] on payload (de)serialization failure
    pub async fn call<Req, Resp>(&self, request: &Req, timeout: Duration) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(RpcError::Encode)?;
        let payload = self.call_raw(Bytes::from(body), timeout).await?;
        serde_json::from_value(payload).map_err(RpcError::Decode)
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn call_default<Req, Resp>(&self, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.call(request, self.config.timeout).await
    }

    /// Issue a call with an already-encoded JSON body and return the raw reply payload.
    pub async fn call_raw(&self, body: Bytes, timeout: Duration) -> Result<Value, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::ConnectionClosed);
        }

        let (correlation_id, mut reply) = self.registry.register();
        let _guard = PendingGuard {
            registry: &self.registry,
            correlation_id: &correlation_id,
        };

        // The dispatcher may have failed all calls between the check above and registration.
        if !self.is_connected() {
            return Err(RpcError::ConnectionClosed);
        }

        let properties = MessageProperties::default()
            .with_correlation_id(correlation_id.as_str())
            .with_reply_to(self.reply_queue.name())
            .with_content_type(JSON_CONTENT_TYPE);

        debug!(
            correlation_id = %correlation_id,
            work_queue = %self.config.work_queue,
            bytes = body.len(),
            "Publishing RPC request"
        );
        self.channel
            .publish(&self.config.work_queue, body, properties)
            .await?;

        match tokio::time::timeout(timeout, &mut reply).await {
            Ok(outcome) => outcome,

            Err(_) if self.registry.discard(&correlation_id) => {
                warn!(
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "RPC call timed out"
                );
                Err(RpcError::Timeout(timeout))
            }

            // The reply won the race against the timer and is already in the slot.
            Err(_) => reply.await,
        }
    }

    /// Tear the client down: close the channel and fail every outstanding call.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.channel.close().await;
        let failed = self.registry.fail_all(|| RpcError::ConnectionClosed);

        info!(reply_queue = %self.reply_queue, failed, "RPC client closed");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    /// How long the oldest outstanding call has been waiting, if any.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.registry.oldest_pending_age()
    }

    pub fn reply_queue(&self) -> &QueueHandle {
        &self.reply_queue
    }

    /// Get the client configuration.
    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Removes the registry entry if the call future is dropped before it resolves.
struct PendingGuard<'a> {
    registry: &'a CorrelationRegistry,
    correlation_id: &'a CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.registry.discard(self.correlation_id) {
            debug!(correlation_id = %self.correlation_id, "Discarded abandoned RPC call");
        }
    }
}

/// Route every reply on the client's queue to its pending call until the stream ends.
async fn dispatch_replies(
    mut replies: DeliveryStream,
    registry: Arc<CorrelationRegistry>,
    connected: Arc<AtomicBool>,
    reply_queue: QueueHandle,
) {
    while let Some(delivery) = replies.next().await {
        let Some(correlation_id) = delivery.properties.correlation_id.as_deref() else {
            warn!(reply_queue = %reply_queue, "Discarding reply without correlation id");
            continue;
        };
        let correlation_id = CorrelationId::from(correlation_id);

        let outcome = ReplyEnvelope::decode(&delivery.body)
            .map_err(RpcError::Decode)
            .and_then(ReplyEnvelope::into_outcome);

        if let Err(e) = registry.resolve(&correlation_id, outcome) {
            debug!(error = %e, "Discarding late or duplicate reply");
        }
    }

    connected.store(false, Ordering::SeqCst);
    let failed = registry.fail_all(|| RpcError::ConnectionClosed);
    info!(reply_queue = %reply_queue, failed, "Reply stream closed");
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::rpc_queue::channel::{Delivery, InMemoryBroker, InMemoryChannel};

    const WORK_QUEUE: &str = "work";

    async fn connect(broker: &InMemoryBroker) -> (Arc<InMemoryChannel>, RpcClient) {
        let channel = Arc::new(broker.connect());
        let config = RpcClientConfig::builder().work_queue(WORK_QUEUE).build();
        let client = RpcClient::connect(channel.clone(), config).await.unwrap();
        (channel, client)
    }

    async fn work_queue(channel: &InMemoryChannel) -> DeliveryStream {
        let queue = channel.declare_queue(WORK_QUEUE, true).await.unwrap();
        channel.consume(&queue, ConsumeOptions::auto_ack()).await.unwrap()
    }

    async fn reply(channel: &InMemoryChannel, request: &Delivery, envelope: ReplyEnvelope) {
        let properties = MessageProperties {
            correlation_id: request.properties.correlation_id.clone(),
            ..MessageProperties::default()
        };
        let reply_to = request.properties.reply_to.as_deref().unwrap();
        channel
            .publish(reply_to, envelope.encode().unwrap(), properties)
            .await
            .unwrap();
    }

    fn echo(request: &Delivery) -> ReplyEnvelope {
        ReplyEnvelope::Ok {
            payload: serde_json::from_slice(&request.body).unwrap(),
        }
    }

    /// Replies to every request with its own body after `delay`.
    fn spawn_echo_worker(broker: &InMemoryBroker, delay: Duration) -> JoinHandle<()> {
        let channel = broker.connect();
        tokio::spawn(async move {
            let mut requests = work_queue(&channel).await;
            while let Some(request) = requests.next().await {
                tokio::time::sleep(delay).await;
                reply(&channel, &request, echo(&request)).await;
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_returns_worker_reply() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let worker = broker.connect();
        tokio::spawn(async move {
            let mut requests = work_queue(&worker).await;
            let request = requests.next().await.unwrap();
            assert_eq!(
                serde_json::from_slice::<Value>(&request.body).unwrap(),
                json!({"doc_id": "abc"})
            );
            assert_eq!(request.properties.content_type.as_deref(), Some(JSON_CONTENT_TYPE));

            tokio::time::sleep(Duration::from_millis(200)).await;
            let payload = ReplyEnvelope::Ok {
                payload: json!({"text": "hello"}),
            };
            reply(&worker, &request, payload).await;
            // Keep the connection open until the client has the reply.
            std::future::pending::<()>().await;
        });

        let started = Instant::now();
        let response: Value = client
            .call(&json!({"doc_id": "abc"}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response, json!({"text": "hello"}));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_without_worker_times_out_and_late_reply_is_ignored() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let started = Instant::now();
        let err = client
            .call::<_, Value>(&json!({"doc_id": "abc"}), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_secs(1)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1100));
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(broker.queue_depth(WORK_QUEUE), Some(1));

        // A worker shows up late and answers the abandoned request at t = 2s.
        tokio::time::sleep_until(started + Duration::from_secs(2)).await;
        let worker = broker.connect();
        let mut requests = work_queue(&worker).await;
        let request = requests.next().await.unwrap();
        reply(&worker, &request, echo(&request)).await;
        tokio::task::yield_now().await;

        assert_eq!(client.pending_calls(), 0);
        assert!(client.is_connected());

        // The client keeps working for later calls.
        let late_worker = tokio::spawn(async move {
            let request = requests.next().await.unwrap();
            reply(&worker, &request, echo(&request)).await;
            std::future::pending::<()>().await;
        });
        let response: Value = client
            .call(&json!({"n": 2}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, json!({"n": 2}));
        late_worker.abort();
    }

    #[tokio::test]
    async fn test_replies_in_reverse_order_reach_their_own_callers() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let worker = broker.connect();
        tokio::spawn(async move {
            let mut requests = work_queue(&worker).await;
            let a = requests.next().await.unwrap();
            let b = requests.next().await.unwrap();
            reply(&worker, &b, echo(&b)).await;
            reply(&worker, &a, echo(&a)).await;
            std::future::pending::<()>().await;
        });

        let timeout = Duration::from_secs(5);
        let first = json!("A");
        let second = json!("B");
        let (a, b) = tokio::join!(
            client.call::<_, Value>(&first, timeout),
            client.call::<_, Value>(&second, timeout),
        );

        assert_eq!(a.unwrap(), json!("A"));
        assert_eq!(b.unwrap(), json!("B"));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_are_not_cross_delivered() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;
        let client = Arc::new(client);
        let _worker = spawn_echo_worker(&broker, Duration::ZERO);

        let calls = (0..100).map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let request = json!({"doc_id": format!("doc-{n}")});
                let response: Value = client.call(&request, Duration::from_secs(5)).await.unwrap();
                (request, response)
            })
        });

        for call in futures::future::join_all(calls).await {
            let (request, response) = call.unwrap();
            assert_eq!(request, response);
        }
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_correlation_id_has_no_effect() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;
        let _worker = spawn_echo_worker(&broker, Duration::ZERO);

        let stranger = broker.connect();
        let stray = MessageProperties::default().with_correlation_id("never-issued");
        let body = ReplyEnvelope::Ok { payload: json!(1) }.encode().unwrap();
        stranger
            .publish(client.reply_queue().name(), body.clone(), stray)
            .await
            .unwrap();
        stranger
            .publish(client.reply_queue().name(), body, MessageProperties::default())
            .await
            .unwrap();

        let response: Value = client
            .call(&json!("still works"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response, json!("still works"));
        assert!(client.is_connected());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_drains_after_sequential_calls() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        for _ in 0..3 {
            let result = client
                .call::<_, Value>(&json!("nobody home"), Duration::from_millis(100))
                .await;
            assert!(matches!(result, Err(RpcError::Timeout(_))));
            assert_eq!(client.pending_calls(), 0);
        }

        let _worker = spawn_echo_worker(&broker, Duration::from_millis(10));
        // The worker first drains the three stale requests; their replies are discarded.
        for n in 0..10 {
            let response: Value = client
                .call(&json!(n), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(response, json!(n));
            assert_eq!(client.pending_calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_remote_error_is_distinguished() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let worker = broker.connect();
        tokio::spawn(async move {
            let mut requests = work_queue(&worker).await;
            let request = requests.next().await.unwrap();
            reply(&worker, &request, ReplyEnvelope::error("bad_scan", "unreadable")).await;
            std::future::pending::<()>().await;
        });

        let err = client
            .call::<_, Value>(&json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref code, .. } if code == "bad_scan"));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_only_its_call() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let worker = broker.connect();
        tokio::spawn(async move {
            let mut requests = work_queue(&worker).await;
            let request = requests.next().await.unwrap();
            let properties = MessageProperties {
                correlation_id: request.properties.correlation_id.clone(),
                ..MessageProperties::default()
            };
            let reply_to = request.properties.reply_to.clone().unwrap();
            worker
                .publish(&reply_to, Bytes::from_static(b"not json"), properties)
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        let err = client
            .call::<_, Value>(&json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_and_future_calls() {
        let broker = InMemoryBroker::new();
        let (channel, client) = connect(&broker).await;
        let client = Arc::new(client);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call::<_, Value>(&json!("stuck"), Duration::from_secs(60))
                    .await
            })
        };
        while client.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }

        channel.close().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        assert!(err.is_transport());
        assert!(!client.is_connected());
        assert_eq!(client.pending_calls(), 0);

        let err = client
            .call::<_, Value>(&json!("after"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_deletes_reply_queue() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;
        let reply_queue = client.reply_queue().name().to_string();
        assert!(broker.queue_exists(&reply_queue));
        assert!(broker.queue_exists(WORK_QUEUE));

        client.close().await;

        assert!(!broker.queue_exists(&reply_queue));
        assert!(broker.queue_exists(WORK_QUEUE));
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_is_removed_from_registry() {
        let broker = InMemoryBroker::new();
        let (_channel, client) = connect(&broker).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.call::<_, Value>(&json!("slow"), Duration::from_secs(60)),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(client.pending_calls(), 0);
    }
}
