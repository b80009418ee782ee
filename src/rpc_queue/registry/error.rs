use crate::rpc_queue::correlation::CorrelationId;

/// Indicates that a call could not be registered because its id is already outstanding.
#[derive(Debug, thiserror::Error)]
#[error("correlation id ({correlation_id}) is already pending")]
pub struct CorrelationIdInUse {
    pub correlation_id: CorrelationId,
}

/// Indicates that no outstanding call exists for an id: it was already resolved, timed out,
/// cancelled, or never issued.
#[derive(Debug, thiserror::Error)]
#[error("no pending call for correlation id ({correlation_id})")]
pub struct CallNotPending {
    pub correlation_id: CorrelationId,
}
