//! Forwarding of the `/auth/*` routes to the authentication service.

use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::gateway::error::{GatewayError, GatewayResult};

#[derive(Clone, Deserialize, Serialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct UserRegistration {
    #[serde(alias = "username")]
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for UserRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRegistration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateOtp {
    pub email: String,
}

/// HTTP client for the authentication service rooted at `AUTH_BASE_URL`.
#[derive(Debug, Clone)]
pub struct AuthServiceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AuthServiceClient {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchange credentials for an access token (`POST /api/token`).
    pub async fn login(&self, credentials: &UserCredentials) -> GatewayResult<Value> {
        self.forward("api/token", credentials).await
    }

    /// Create a user (`POST /api/users`).
    pub async fn register(&self, registration: &UserRegistration) -> GatewayResult<Value> {
        let body = json!({
            "name": registration.name,
            "email": registration.email,
            "password": registration.password,
        });
        self.forward("api/users", &body).await
    }

    /// Send a one-time password to an email address (`POST /api/users/generate_otp`).
    pub async fn generate_otp(&self, request: &GenerateOtp) -> GatewayResult<Value> {
        self.forward("api/users/generate_otp", request).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// POST `body` as JSON and return the JSON reply.
    ///
    /// Non-success statuses are returned as [`GatewayError::AuthService`] with the upstream
    /// status and body; a failed connection is [`GatewayError::AuthServiceUnavailable`].
    async fn forward<T>(&self, path: &str, body: &T) -> GatewayResult<Value>
    where
        T: Serialize + ?Sized,
    {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Authentication service request failed");
                GatewayError::AuthServiceUnavailable
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to read authentication service response");
            GatewayError::AuthServiceUnavailable
        })?;

        if status.is_success() {
            debug!(url = %url, %status, "Authentication service call succeeded");
            return serde_json::from_slice(&bytes).map_err(|e| GatewayError::AuthService {
                status: StatusCode::BAD_GATEWAY,
                detail: Value::String(format!("invalid JSON from authentication service: {e}")),
            });
        }

        debug!(url = %url, %status, "Authentication service rejected request");
        let detail = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Err(GatewayError::AuthService { status, detail })
    }
}
