use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::{DashMap, Entry};
use serde_json::Value;
use tokio::sync::oneshot;

use self::error::{CallNotPending, CorrelationIdInUse};
use crate::rpc_queue::correlation::CorrelationId;
use crate::rpc_queue::error::RpcError;

pub mod error;

/// The single result delivered to a caller.
pub type CallOutcome = Result<Value, RpcError>;

#[derive(Debug)]
struct PendingCall {
    slot: oneshot::Sender<CallOutcome>,
    created_at: Instant,
}

/// Outstanding calls of one client, keyed by [`CorrelationId`].
///
/// Every entry is removed in the same step that resolves it, so an id can be resolved at most
/// once and a late reply can never revive a call that already timed out or was cancelled.
#[derive(Debug)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingCall, ahash::RandomState>,
}

impl CorrelationRegistry {
    /// Construct a new empty [`CorrelationRegistry`].
    pub fn new() -> CorrelationRegistry {
        Self::default()
    }

    /// Register a call under a freshly generated id.
    pub fn register(&self) -> (CorrelationId, PendingReply) {
        loop {
            let correlation_id = CorrelationId::generate();
            if let Ok(reply) = self.register_with(correlation_id.clone()) {
                return (correlation_id, reply);
            }
        }
    }

    /// Register a call under a caller-chosen id.
    pub fn register_with(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<PendingReply, CorrelationIdInUse> {
        match self.pending.entry(correlation_id) {
            Entry::Occupied(entry) => Err(CorrelationIdInUse {
                correlation_id: entry.key().clone(),
            }),

            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(PendingCall {
                    slot: sender,
                    created_at: Instant::now(),
                });
                Ok(PendingReply { receiver })
            }
        }
    }

    /// Deliver `outcome` to the call registered under `correlation_id`.
    pub fn resolve(
        &self,
        correlation_id: &CorrelationId,
        outcome: CallOutcome,
    ) -> Result<(), CallNotPending> {
        let (_, call) = self
            .pending
            .remove(correlation_id)
            .ok_or_else(|| CallNotPending {
                correlation_id: correlation_id.clone(),
            })?;

        // The waiter may have gone away already; the entry is removed either way.
        let _ = call.slot.send(outcome);
        Ok(())
    }

    /// Remove the call and wake its waiter with [`RpcError::Cancelled`].
    pub fn cancel(&self, correlation_id: &CorrelationId) -> Result<(), CallNotPending> {
        self.resolve(correlation_id, Err(RpcError::Cancelled))
    }

    /// Remove the call without waking anyone. Returns `false` if it was no longer pending.
    pub(crate) fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Fail every outstanding call, e.g. on connection loss. Returns how many were failed.
    pub fn fail_all(&self, error: impl Fn() -> RpcError) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| entry.key().clone()).collect();

        ids.iter()
            .filter(|id| self.resolve(id, Err(error())).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Age of the longest outstanding call.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.pending
            .iter()
            .map(|entry| entry.created_at.elapsed())
            .max()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self {
            pending: DashMap::default(),
        }
    }
}

/// Completion slot of one registered call. Resolves exactly once.
#[derive(Debug)]
pub struct PendingReply {
    receiver: oneshot::Receiver<CallOutcome>,
}

impl Future for PendingReply {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RpcError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = CorrelationRegistry::new();
        let (id, reply) = registry.register();
        assert_eq!(registry.len(), 1);

        registry.resolve(&id, Ok(json!({"text": "hello"}))).unwrap();
        assert!(registry.is_empty());
        assert_eq!(reply.await.unwrap(), json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_reported_and_harmless() {
        let registry = CorrelationRegistry::new();
        let (id, reply) = registry.register();

        let err = registry
            .resolve(&CorrelationId::from("unknown"), Ok(json!(1)))
            .unwrap_err();
        assert_eq!(err.correlation_id, CorrelationId::from("unknown"));
        assert_eq!(registry.len(), 1);

        registry.resolve(&id, Ok(json!(2))).unwrap();
        assert_eq!(reply.await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_second_resolution_is_rejected() {
        let registry = CorrelationRegistry::new();
        let (id, reply) = registry.register();

        registry.resolve(&id, Ok(json!("first"))).unwrap();
        assert!(registry.resolve(&id, Ok(json!("second"))).is_err());
        assert_eq!(reply.await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter_and_blocks_late_resolve() {
        let registry = CorrelationRegistry::new();
        let (id, reply) = registry.register();

        registry.cancel(&id).unwrap();
        assert!(matches!(reply.await, Err(RpcError::Cancelled)));
        assert!(registry.resolve(&id, Ok(json!("late"))).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_entry_silently() {
        let registry = CorrelationRegistry::new();
        let (id, _reply) = registry.register();

        assert!(registry.discard(&id));
        assert!(!registry.discard(&id));
        assert!(registry.resolve(&id, Ok(json!(null))).is_err());
    }

    #[test]
    fn test_duplicate_id_is_refused() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("fixed");

        let _reply = registry.register_with(id.clone()).unwrap();
        let err = registry.register_with(id.clone()).unwrap_err();
        assert_eq!(err.correlation_id, id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_drains_registry() {
        let registry = CorrelationRegistry::new();
        let (_, first) = registry.register();
        let (_, second) = registry.register();

        assert_eq!(registry.fail_all(|| RpcError::ConnectionClosed), 2);
        assert!(registry.is_empty());
        assert!(matches!(first.await, Err(RpcError::ConnectionClosed)));
        assert!(matches!(second.await, Err(RpcError::ConnectionClosed)));
    }

    #[test]
    fn test_oldest_pending_age() {
        let registry = CorrelationRegistry::new();
        assert!(registry.oldest_pending_age().is_none());

        let (_id, _reply) = registry.register();
        assert!(registry.oldest_pending_age().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_resolve() {
        let registry = std::sync::Arc::new(CorrelationRegistry::new());
        let mut tasks = Vec::new();

        for n in 0..64 {
            let registry = std::sync::Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (id, reply) = registry.register();
                let resolver = std::sync::Arc::clone(&registry);
                tokio::spawn(async move { resolver.resolve(&id, Ok(json!(n))).unwrap() });
                reply.await.unwrap()
            }));
        }

        for (n, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), json!(n));
        }
        assert!(registry.is_empty());
    }
}
