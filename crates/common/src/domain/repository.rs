use crate::domain::{DomainResult, Envelope, StoredMessage};
use crate::log_store::EntryId;
use async_trait::async_trait;

/// Default page size of the recent-messages query
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// Store of record for chat messages (the persistence sink).
///
/// Implementations do not retry and do not deduplicate. Retries are driven by
/// the outbox consumer leaving entries pending.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Write an envelope and assign it a storage identity
    async fn store(&self, envelope: &Envelope) -> DomainResult<StoredMessage>;

    /// Most recent messages, newest first
    async fn recent(&self, limit: usize) -> DomainResult<Vec<StoredMessage>>;
}

/// Appends envelopes to the durable log
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnvelopeProducer: Send + Sync {
    /// Durably append an envelope, returning the log-assigned entry id
    async fn publish(&self, envelope: &Envelope) -> DomainResult<EntryId>;
}

/// Immediate fan-out of a message to currently connected peers
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LiveBroadcaster: Send + Sync {
    async fn broadcast(&self, envelope: &Envelope) -> DomainResult<()>;
}
