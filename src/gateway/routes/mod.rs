//! HTTP route handlers
//!
//! - `health`: RPC client liveness
//! - `ocr`: token-gated OCR over the work queue
//! - `auth`: pass-through to the authentication service

pub mod auth;
pub mod health;
pub mod ocr;

use crate::gateway::error::GatewayError;

/// Fallback for undefined routes.
pub async fn not_found() -> GatewayError {
    GatewayError::NotFound
}
