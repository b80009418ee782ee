//! # rpc_queue
//!
//! Request/reply calls layered over an asynchronous message queue.
//!
//! ## Protocol
//!
//! - The worker consumes a durable, well-known work queue (e.g. `ocr_service`).
//! - Each client owns one exclusive reply queue with a broker-assigned name, declared when the
//!   client connects and deleted with its connection.
//! - A request carries `reply_to` (the client's reply queue) and a fresh `correlation_id`.
//! - The worker publishes exactly one reply to `reply_to` carrying the same `correlation_id`.
//!   The reply body is a [`ReplyEnvelope`]: `{"status":"ok","payload":...}` or
//!   `{"status":"error","code":...,"message":...}`.
//! - The client routes each reply to the matching pending call. Replies for unknown ids
//!   (late, duplicate or foreign) are discarded.
//!
//! ## Client Side
//!
//! ```ignore
//! use ocr_rpc_gateway::rpc_queue::{InMemoryBroker, RpcClient, RpcClientConfig};
//!
//! let broker = InMemoryBroker::new();
//! let config = RpcClientConfig::builder().work_queue("ocr_service").build();
//! let client = RpcClient::connect(Arc::new(broker.connect()), config).await?;
//!
//! let response: OcrResponse = client.call(&request, Duration::from_secs(5)).await?;
//! ```
//!
//! ## Server Side
//!
//! ```ignore
//! use ocr_rpc_gateway::rpc_queue::{RpcWorker, RpcWorkerConfig, handler_fn};
//!
//! let config = RpcWorkerConfig::builder().work_queue("ocr_service").build();
//! let worker = RpcWorker::new(Arc::new(broker.connect()), config, handler_fn(
//!     |request: OcrRequest| async move { Ok(OcrResponse { text: run_ocr(&request)? }) },
//! ));
//!
//! worker.run().await?;
//! ```

// Shared modules at root level
mod correlation;
mod envelope;
mod error;

pub mod channel;
pub mod registry;

// Submodules for client and server
pub mod client;
pub mod server;

// Re-export shared types
pub use correlation::CorrelationId;
pub use envelope::{JSON_CONTENT_TYPE, ReplyEnvelope};
pub use error::RpcError;

// Convenience re-exports for common use
pub use channel::{
    ChannelError, ConsumeOptions, Delivery, DeliveryStream, InMemoryBroker, InMemoryChannel,
    MessageChannel, MessageProperties, QueueHandle,
};
pub use client::{RpcClient, RpcClientConfig};
pub use registry::{CallOutcome, CorrelationRegistry, PendingReply};
pub use server::{HandlerError, RpcHandler, RpcWorker, RpcWorkerConfig, TypedHandler, handler_fn};
