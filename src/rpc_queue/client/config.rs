use std::time::Duration;

use bon::Builder;

/// Configuration for the RPC client.
#[derive(Debug, Clone, Builder)]
pub struct RpcClientConfig {
    /// Well-known queue the worker consumes requests from (e.g., "ocr_service").
    #[builder(into)]
    pub work_queue: String,

    /// Deadline used by [`RpcClient::call_default`](super::RpcClient::call_default).
    #[builder(default = Duration::from_secs(30))]
    pub timeout: Duration,

    /// Declare the work queue as durable on connect so requests published before any worker
    /// starts are kept rather than dropped.
    #[builder(default = true)]
    pub declare_work_queue: bool,
}
