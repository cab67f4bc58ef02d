use crate::domain::{DomainResult, Envelope, MessageRepository, StoredMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of MessageRepository using a Vec.
///
/// Storage ids are assigned sequentially from 1. Like the Postgres repository
/// it performs no deduplication, so a redelivered envelope is stored twice.
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of stored records, duplicates included
    pub async fn count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// All stored records in storage order
    pub async fn all(&self) -> Vec<StoredMessage> {
        self.messages.read().await.clone()
    }
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn store(&self, envelope: &Envelope) -> DomainResult<StoredMessage> {
        let mut messages = self.messages.write().await;
        let stored = StoredMessage {
            storage_id: messages.len() as i64 + 1,
            envelope: envelope.clone(),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, limit: usize) -> DomainResult<Vec<StoredMessage>> {
        let messages = self.messages.read().await;
        let mut recent: Vec<StoredMessage> = messages.clone();
        recent.sort_by(|a, b| {
            b.envelope
                .timestamp()
                .cmp(&a.envelope.timestamp())
                .then(b.storage_id.cmp(&a.storage_id))
        });
        recent.truncate(limit);
        Ok(recent)
    }
}
