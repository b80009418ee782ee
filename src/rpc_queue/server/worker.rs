use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::rpc_queue::channel::{
    ConsumeOptions, Delivery, DeliveryStream, MessageChannel, MessageProperties,
};
use crate::rpc_queue::envelope::{JSON_CONTENT_TYPE, ReplyEnvelope};
use crate::rpc_queue::error::RpcError;
use crate::rpc_queue::server::config::RpcWorkerConfig;
use crate::rpc_queue::server::handler::RpcHandler;

/// Serves one work queue: every request is handed to the handler and answered with exactly
/// one reply on its `reply_to` queue, carrying the request's correlation id.
///
/// A request is acknowledged only after its reply has been published. If publishing fails
/// the request is requeued, so delivery is at-least-once and a caller may see a duplicate
/// reply, which the client discards.
pub struct RpcWorker {
    channel: Arc<dyn MessageChannel>,
    handler: Arc<dyn RpcHandler>,
    config: RpcWorkerConfig,
}

impl RpcWorker {
    /// Create a new RPC worker.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        config: RpcWorkerConfig,
        handler: impl RpcHandler,
    ) -> Self {
        Self {
            channel,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Run the worker until its delivery stream ends.
    pub async fn run(self) -> Result<(), RpcError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the worker until `shutdown` completes or the delivery stream ends.
    ///
    /// The broker hands this worker at most `concurrency` unacknowledged requests at a time.
    /// On return the consumer is cancelled and any delivery it had buffered but not started
    /// is requeued for other consumers, whether or not other handles to the channel remain.
    /// Requests already being handled are finished before this returns.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), RpcError>
    where
        S: Future<Output = ()> + Send,
    {
        let queue = self
            .channel
            .declare_queue(&self.config.work_queue, true)
            .await?;

        let concurrency = self.config.concurrency.max(1);
        let consumer_tag = self
            .config
            .consumer_tag
            .clone()
            .unwrap_or_else(|| format!("rpc-worker-{}", Uuid::new_v4().simple()));
        let options = ConsumeOptions::manual_ack()
            .with_consumer_tag(consumer_tag.clone())
            .with_prefetch(concurrency);
        let mut deliveries = self.channel.consume(&queue, options).await?;

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            work_queue = %queue,
            consumer_tag = %consumer_tag,
            concurrency,
            "RPC worker started"
        );

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = &mut shutdown => break,
                delivery = deliveries.next() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        info!(work_queue = %queue, "Work queue stream closed");
                        break;
                    }
                },
            };

            let channel = Arc::clone(&self.channel);
            let handler = Arc::clone(&self.handler);
            in_flight.spawn(async move {
                let _permit = permit;
                process_request(channel.as_ref(), handler.as_ref(), delivery).await;
            });

            while let Some(result) = in_flight.try_join_next() {
                log_task_result(result);
            }
        }

        if self.channel.is_open() {
            match self.channel.cancel(&consumer_tag).await {
                Ok(()) => requeue_buffered(self.channel.as_ref(), &mut deliveries).await,
                Err(e) => warn!(consumer_tag = %consumer_tag, error = %e, "Failed to cancel consumer"),
            }
        }

        while let Some(result) = in_flight.join_next().await {
            log_task_result(result);
        }

        info!(work_queue = %queue, "RPC worker stopped");
        Ok(())
    }

    /// Get the worker configuration.
    pub fn config(&self) -> &RpcWorkerConfig {
        &self.config
    }
}

/// Hand back deliveries that reached a cancelled consumer but were never started.
async fn requeue_buffered(channel: &dyn MessageChannel, deliveries: &mut DeliveryStream) {
    let mut requeued = 0usize;
    while let Some(delivery) = deliveries.next().await {
        match channel.nack(delivery.delivery_tag, true).await {
            Ok(()) => requeued += 1,
            Err(e) => warn!(
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to requeue buffered request"
            ),
        }
    }
    if requeued > 0 {
        debug!(requeued, "Requeued buffered requests");
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "RPC request task failed");
    }
}

async fn process_request(channel: &dyn MessageChannel, handler: &dyn RpcHandler, delivery: Delivery) {
    let delivery_tag = delivery.delivery_tag;
    let correlation_id = delivery.properties.correlation_id.clone();

    let Some(reply_to) = delivery.properties.reply_to.clone() else {
        warn!(
            delivery_tag,
            correlation_id = ?correlation_id,
            "Request has no reply_to, acknowledging without reply"
        );
        if let Err(e) = channel.ack(delivery_tag).await {
            warn!(delivery_tag, error = %e, "Failed to acknowledge request");
        }
        return;
    };

    debug!(
        delivery_tag,
        correlation_id = ?correlation_id,
        redelivered = delivery.redelivered,
        "Handling RPC request"
    );

    let envelope = match AssertUnwindSafe(handler.handle(delivery.body))
        .catch_unwind()
        .await
    {
        Ok(Ok(payload)) => ReplyEnvelope::Ok { payload },
        Ok(Err(e)) => {
            debug!(correlation_id = ?correlation_id, error = %e, "Handler returned an error");
            e.into()
        }
        Err(_) => {
            error!(correlation_id = ?correlation_id, "Handler panicked");
            ReplyEnvelope::error("handler_panic", RpcError::HandlerPanic.to_string())
        }
    };

    let body = match envelope.encode() {
        Ok(body) => body,
        Err(e) => {
            error!(correlation_id = ?correlation_id, error = %e, "Failed to encode reply");
            if let Err(e) = channel.nack(delivery_tag, false).await {
                warn!(delivery_tag, error = %e, "Failed to reject request");
            }
            return;
        }
    };

    let properties = MessageProperties {
        correlation_id: correlation_id.clone(),
        reply_to: None,
        content_type: Some(JSON_CONTENT_TYPE.to_string()),
    };

    match channel.publish(&reply_to, body, properties).await {
        Ok(()) => {
            if let Err(e) = channel.ack(delivery_tag).await {
                warn!(delivery_tag, error = %e, "Failed to acknowledge request");
            }
        }
        Err(e) => {
            warn!(
                correlation_id = ?correlation_id,
                reply_to = %reply_to,
                error = %e,
                "Failed to publish reply, requeueing request"
            );
            if let Err(e) = channel.nack(delivery_tag, true).await {
                warn!(delivery_tag, error = %e, "Failed to requeue request");
            }
        }
    }
}
