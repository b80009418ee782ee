use bon::Builder;

/// Configuration for the RPC worker.
#[derive(Debug, Clone, Builder)]
pub struct RpcWorkerConfig {
    /// Durable queue requests are consumed from (e.g., "ocr_service").
    #[builder(into)]
    pub work_queue: String,

    /// Maximum number of requests handled at once.
    #[builder(default = 4)]
    pub concurrency: usize,

    /// Consumer tag reported to the broker. Broker-assigned if not set.
    #[builder(into)]
    pub consumer_tag: Option<String>,
}
