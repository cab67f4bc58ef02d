use anyhow::Result;
use async_trait::async_trait;

/// Trait for core NATS publish operations
/// Abstracts the client so fan-out can be tested without a server
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NatsPublisher: Send + Sync {
    /// Publish a message to a subject (fire-and-forget, no stream persistence)
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()>;
}
