use crate::domain::{DomainError, DomainResult, Envelope, MessageRepository, StoredMessage};
use crate::postgres::PostgresClient;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Chat message row as stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl TryFrom<ChatMessageRow> for StoredMessage {
    type Error = DomainError;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        let envelope = Envelope::with_timestamp(row.sender, row.content, row.sent_at)
            .map_err(|e| DomainError::RepositoryError(anyhow!("row {} is invalid: {}", row.id, e)))?;
        Ok(StoredMessage {
            storage_id: row.id,
            envelope,
        })
    }
}

#[derive(Clone)]
pub struct PostgresMessageRepository {
    client: PostgresClient,
}

impl PostgresMessageRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    #[instrument(skip(self, envelope), fields(sender = %envelope.sender()))]
    async fn store(&self, envelope: &Envelope) -> DomainResult<StoredMessage> {
        // The connection is checked back into the pool when `conn` drops,
        // whichever way this function returns.
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::StoreWriteFailure)?;

        let row = conn
            .query_one(
                "INSERT INTO chat_messages (sender, content, sent_at)
                 VALUES ($1, $2, $3)
                 RETURNING id",
                &[&envelope.sender(), &envelope.content(), &envelope.timestamp()],
            )
            .await
            .map_err(|e| DomainError::StoreWriteFailure(e.into()))?;

        let storage_id: i64 = row.get("id");
        debug!(storage_id, "stored chat message");

        Ok(StoredMessage {
            storage_id,
            envelope: envelope.clone(),
        })
    }

    async fn recent(&self, limit: usize) -> DomainResult<Vec<StoredMessage>> {
        let conn = self.client.get_connection().await?;

        let rows = conn
            .query(
                "SELECT id, sender, content, sent_at
                 FROM chat_messages
                 ORDER BY sent_at DESC, id DESC
                 LIMIT $1",
                &[&(limit as i64)],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.into_iter()
            .map(|row| {
                StoredMessage::try_from(ChatMessageRow {
                    id: row.get("id"),
                    sender: row.get("sender"),
                    content: row.get("content"),
                    sent_at: row.get("sent_at"),
                })
            })
            .collect()
    }
}
