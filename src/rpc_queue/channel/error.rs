/// Errors surfaced by a [`MessageChannel`](super::MessageChannel).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The connection behind the channel has been closed.
    #[error("channel closed")]
    Closed,

    /// No queue with the given name has been declared.
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// The queue name is not acceptable to the broker.
    #[error("invalid queue name '{0}'")]
    InvalidQueueName(String),

    /// A queue was redeclared with properties that do not match the existing one.
    #[error("precondition failed for queue '{queue}': {reason}")]
    PreconditionFailed { queue: String, reason: String },

    /// The queue is exclusive to another connection.
    #[error("queue '{0}' is locked by another connection")]
    ResourceLocked(String),

    /// The delivery tag is unknown or belongs to another connection.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// No consumer with the given tag exists on this connection.
    #[error("unknown consumer tag '{0}'")]
    UnknownConsumerTag(String),
}
