//! OCR request/response payloads and the engine seam behind the worker.
//!
//! The recognition itself is opaque to this crate: an [`OcrEngine`] turns document bytes into
//! text. [`PlainTextEngine`] handles documents that already are UTF-8 text, which is enough to
//! run the whole stack without a model.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rpc_queue::{HandlerError, RpcHandler, handler_fn};

/// Request published by the gateway to the OCR work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrRequest {
    pub user_name: String,
    pub user_email: String,
    pub user_id: i64,
    /// Base64 (standard alphabet) document contents.
    pub file: String,
}

/// Reply payload of the OCR worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("unsupported document: {0}")]
    Unsupported(String),
}

impl OcrError {
    pub fn code(&self) -> &'static str {
        match self {
            OcrError::EmptyDocument => "empty_document",
            OcrError::Unsupported(_) => "unsupported_document",
        }
    }
}

impl From<OcrError> for HandlerError {
    fn from(err: OcrError) -> Self {
        HandlerError::new(err.code(), err.to_string())
    }
}

/// Text recognition over raw document bytes. Called on a blocking thread.
pub trait OcrEngine: Send + Sync + 'static {
    fn recognize(&self, document: &[u8]) -> Result<String, OcrError>;
}

/// Accepts documents that are already UTF-8 text and returns them trimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextEngine;

impl OcrEngine for PlainTextEngine {
    fn recognize(&self, document: &[u8]) -> Result<String, OcrError> {
        if document.is_empty() {
            return Err(OcrError::EmptyDocument);
        }

        let text = std::str::from_utf8(document)
            .map_err(|e| OcrError::Unsupported(format!("not UTF-8 text: {e}")))?;
        Ok(text.trim().to_string())
    }
}

/// Build the worker handler for OCR requests backed by `engine`.
pub fn ocr_handler<E: OcrEngine>(engine: Arc<E>) -> impl RpcHandler {
    handler_fn(move |request: OcrRequest| {
        let engine = Arc::clone(&engine);
        async move {
            let document = STANDARD
                .decode(request.file.as_bytes())
                .map_err(|e| HandlerError::invalid_request(format!("file is not base64: {e}")))?;

            let bytes = document.len();
            let text = tokio::task::spawn_blocking(move || engine.recognize(&document))
                .await
                .map_err(|e| HandlerError::new("engine_failed", e.to_string()))??;

            info!(
                user_id = request.user_id,
                bytes,
                chars = text.chars().count(),
                "OCR request processed"
            );
            Ok::<_, HandlerError>(OcrResponse { text })
        }
    })
}
