use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc_queue::envelope::ReplyEnvelope;

/// A domain failure reported back to the caller inside the reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The request body could not be decoded.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }
}

impl From<HandlerError> for ReplyEnvelope {
    fn from(err: HandlerError) -> Self {
        ReplyEnvelope::Error {
            code: err.code,
            message: err.message,
        }
    }
}

/// The domain operation behind a work queue.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(&self, body: Bytes) -> Result<Value, HandlerError>;
}

/// Adapts a typed async function into an [`RpcHandler`] that speaks JSON.
pub struct TypedHandler<Req, Resp, F> {
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

/// Wrap `handler` so requests are decoded from JSON and responses encoded back.
///
/// # Example
/// ```ignore
/// let handler = handler_fn(|request: OcrRequest| async move {
///     Ok(OcrResponse { text: recognize(&request)? })
/// });
/// ```
pub fn handler_fn<Req, Resp, F, Fut>(handler: F) -> TypedHandler<Req, Resp, F>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
{
    TypedHandler {
        handler,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<Req, Resp, F, Fut> RpcHandler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
{
    async fn handle(&self, body: Bytes) -> Result<Value, HandlerError> {
        let request: Req = serde_json::from_slice(&body)
            .map_err(|e| HandlerError::invalid_request(e.to_string()))?;

        let response = (self.handler)(request).await?;

        serde_json::to_value(response).map_err(|e| HandlerError::new("encode_failed", e.to_string()))
    }
}
