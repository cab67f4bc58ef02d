use crate::log_store::{EntryId, GroupCreation, GroupStart, LogEntry, PendingEntry, ReadGroupRequest};
use anyhow::Result;
use async_trait::async_trait;

/// Trait for append-only log operations with consumer group semantics.
///
/// Entries delivered to a consumer stay in the group's pending entries list
/// until acknowledged, and that list outlives consumer processes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an entry and return the store-assigned id
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<EntryId>;

    /// Create a consumer group, creating the stream if it does not exist
    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> GroupCreation;

    /// Group-scoped read, blocking up to `request.block` for undelivered entries
    async fn read_group(&self, request: ReadGroupRequest) -> Result<Vec<LogEntry>>;

    /// Acknowledge an entry. Unknown or already acknowledged ids are a no-op.
    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<()>;

    /// The oldest `count` entries of the group's pending entries list
    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>>;

    /// Pending entries list record for a single entry
    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>>;
}
