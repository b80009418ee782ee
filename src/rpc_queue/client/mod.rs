//! Client-side types for rpc_queue.
//!
//! This module contains the `RpcClient` and its configuration for issuing calls to a
//! worker over a message queue.
//!
//! # Example
//!
//! ```ignore
//! use ocr_rpc_gateway::rpc_queue::client::{RpcClient, RpcClientConfig};
//!
//! let config = RpcClientConfig::builder()
//!     .work_queue("ocr_service")
//!     .timeout(Duration::from_secs(10))
//!     .build();
//!
//! let client = RpcClient::connect(channel, config).await?;
//!
//! let response: OcrResponse = client.call_default(&request).await?;
//! ```

mod config;
mod rpc_client;

pub use config::RpcClientConfig;
pub use rpc_client::RpcClient;
