use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc_queue::error::RpcError;

/// Content type stamped on every request and reply.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Body of a reply message: either the worker's result or a domain error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyEnvelope {
    Ok { payload: Value },
    Error { code: String, message: String },
}

impl ReplyEnvelope {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ReplyEnvelope::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self {
            ReplyEnvelope::Ok { payload } => Ok(payload),
            ReplyEnvelope::Error { code, message } => Err(RpcError::Remote { code, message }),
        }
    }
}
