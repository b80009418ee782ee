pub mod config;
pub mod gateway;
pub mod ocr;
pub mod rpc_queue;

use rpc_queue::{MessageChannel, RpcError};

/// Durable work queue the OCR worker consumes.
pub const OCR_QUEUE: &str = "ocr_service";

/// Durable queue owned by the gateway service.
pub const GATEWAY_QUEUE: &str = "gatewayservice";

/// Declare the well-known service queues so requests published before any worker starts are
/// kept rather than dropped.
pub async fn declare_service_queues(channel: &dyn MessageChannel) -> Result<(), RpcError> {
    for queue in [GATEWAY_QUEUE, OCR_QUEUE] {
        let handle = channel.declare_queue(queue, true).await?;
        tracing::debug!(queue = %handle, "Declared service queue");
    }
    Ok(())
}
