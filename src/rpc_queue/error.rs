use std::time::Duration;

use thiserror::Error;

use crate::rpc_queue::channel::ChannelError;

/// Errors that can occur while issuing or serving an RPC over the message queue.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The broker rejected an operation or the connection is gone.
    #[error("broker transport error: {0}")]
    Transport(#[from] ChannelError),

    /// No reply arrived before the deadline. The request may still have been processed.
    #[error("timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    /// The reply stream of the client ended while the call was outstanding.
    #[error("RPC connection closed")]
    ConnectionClosed,

    /// The pending call was cancelled before a reply arrived.
    #[error("RPC call cancelled")]
    Cancelled,

    /// The worker processed the request and replied with an error.
    #[error("remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    /// Failed to serialize a request payload.
    #[error("failed to encode request payload")]
    Encode(#[source] serde_json::Error),

    /// Failed to deserialize a reply payload.
    #[error("failed to decode reply payload")]
    Decode(#[source] serde_json::Error),

    /// A handler panicked during execution.
    #[error("handler panicked")]
    HandlerPanic,
}

impl RpcError {
    /// Whether the failure happened in the transport rather than in the worker's domain logic.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::ConnectionClosed | RpcError::Cancelled
        )
    }
}
