use common::domain::{
    DomainResult, Envelope, EnvelopeProducer, LiveBroadcaster, MessageRepository, StoredMessage,
    DEFAULT_RECENT_LIMIT,
};
use common::log_store::EntryId;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct SubmitMessageRequest {
    pub sender: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SubmittedMessage {
    pub envelope: Envelope,
    pub entry_id: EntryId,
}

/// Handles a message submitted by a connected peer.
///
/// Live fan-out and the outbox append run concurrently. Fan-out is best
/// effort; the append result is what the caller sees.
pub struct ChatService {
    broadcaster: Arc<dyn LiveBroadcaster>,
    producer: Arc<dyn EnvelopeProducer>,
    repository: Arc<dyn MessageRepository>,
}

impl ChatService {
    pub fn new(
        broadcaster: Arc<dyn LiveBroadcaster>,
        producer: Arc<dyn EnvelopeProducer>,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            broadcaster,
            producer,
            repository,
        }
    }

    #[instrument(skip(self, request), fields(sender = %request.sender))]
    pub async fn submit(&self, request: SubmitMessageRequest) -> DomainResult<SubmittedMessage> {
        let envelope = Envelope::new(request.sender, request.content)?;

        let (broadcast, published) = tokio::join!(
            self.broadcaster.broadcast(&envelope),
            self.producer.publish(&envelope)
        );

        if let Err(e) = broadcast {
            warn!(error = %e, "live broadcast failed, message will only be available from history");
        }

        let entry_id = published?;
        debug!(entry_id = %entry_id, "message submitted");

        Ok(SubmittedMessage { envelope, entry_id })
    }

    /// Newest stored messages first, `DEFAULT_RECENT_LIMIT` when no limit is given
    pub async fn recent_messages(&self, limit: Option<usize>) -> DomainResult<Vec<StoredMessage>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        self.repository.recent(limit).await
    }
}
