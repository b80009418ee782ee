//! HTTP gateway in front of the OCR work queue.
//!
//! `POST /ocr` validates the caller's bearer token, wraps the uploaded document in an
//! [`OcrRequest`](crate::ocr::OcrRequest) and issues one RPC call; `/auth/*` is forwarded to
//! the authentication service.

pub mod auth_service;
pub mod error;
pub mod routes;
pub mod state;
pub mod token;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

pub use auth_service::{AuthServiceClient, GenerateOtp, UserCredentials, UserRegistration};
pub use error::{ErrorDetail, ErrorResponse, GatewayError, GatewayResult};
pub use state::GatewayState;
pub use token::{Claims, Hs256Validator, TokenError, TokenValidator, bearer_token};

/// Largest accepted request body (uploaded documents included).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the gateway router
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ocr", post(routes::ocr::ocr))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/generate_otp", post(routes::auth::generate_otp))
        .fallback(routes::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
