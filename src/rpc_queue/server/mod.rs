//! Server-side types for rpc_queue.
//!
//! The `RpcWorker` consumes a work queue and answers each request through an `RpcHandler`.

mod config;
mod handler;
mod worker;

pub use config::RpcWorkerConfig;
pub use handler::{HandlerError, RpcHandler, TypedHandler, handler_fn};
pub use worker::RpcWorker;
