use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

pub const JWT_SECRET: &str = "JWT_SECRET";
pub const AUTH_BASE_URL: &str = "AUTH_BASE_URL";
pub const GATEWAY_ADDR: &str = "GATEWAY_ADDR";
pub const RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const WORKER_CONCURRENCY: &str = "WORKER_CONCURRENCY";

const DEFAULT_GATEWAY_ADDR: &str = "0.0.0.0:6000";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WORKER_CONCURRENCY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration read from the environment (and a `.env` file, if present).
#[derive(Clone)]
pub struct ServiceConfig {
    /// HS256 secret shared with the authentication service
    pub jwt_secret: String,

    /// Root URL of the authentication service
    pub auth_base_url: Url,

    /// Address the HTTP gateway binds to
    pub gateway_addr: SocketAddr,

    /// Deadline for one OCR call
    pub rpc_timeout: Duration,

    /// OCR requests handled at once by the worker
    pub worker_concurrency: usize,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("jwt_secret", &"<redacted>")
            .field("auth_base_url", &self.auth_base_url.as_str())
            .field("gateway_addr", &self.gateway_addr)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("worker_concurrency", &self.worker_concurrency)
            .finish()
    }
}

impl ServiceConfig {
    /// Load from the process environment after applying `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup(JWT_SECRET)
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::Missing(JWT_SECRET))?;

        let auth_base_url = lookup(AUTH_BASE_URL).ok_or(ConfigError::Missing(AUTH_BASE_URL))?;
        let auth_base_url = parse(AUTH_BASE_URL, auth_base_url)?;

        let gateway_addr = match lookup(GATEWAY_ADDR) {
            Some(value) => parse(GATEWAY_ADDR, value)?,
            None => parse(GATEWAY_ADDR, DEFAULT_GATEWAY_ADDR.to_string())?,
        };

        let rpc_timeout_secs: u64 = match lookup(RPC_TIMEOUT_SECS) {
            Some(value) => parse(RPC_TIMEOUT_SECS, value)?,
            None => DEFAULT_RPC_TIMEOUT_SECS,
        };
        if rpc_timeout_secs == 0 {
            return Err(invalid(RPC_TIMEOUT_SECS, "0", "must be at least 1"));
        }

        let worker_concurrency: usize = match lookup(WORKER_CONCURRENCY) {
            Some(value) => parse(WORKER_CONCURRENCY, value)?,
            None => DEFAULT_WORKER_CONCURRENCY,
        };
        if worker_concurrency == 0 {
            return Err(invalid(WORKER_CONCURRENCY, "0", "must be at least 1"));
        }

        Ok(Self {
            jwt_secret,
            auth_base_url,
            gateway_addr,
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            worker_concurrency,
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(invalid(key, &value, e)),
    }
}

fn invalid(key: &'static str, value: &str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
