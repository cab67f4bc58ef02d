use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, Envelope, EnvelopeProducer};
use common::log_store::{EntryId, LogStore};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Name of the single field carrying the serialized envelope
pub const PAYLOAD_FIELD: &str = "data";

/// Appends envelopes to the outbox stream.
///
/// Does not retry; a failed append is returned to the caller.
pub struct OutboxProducer {
    log: Arc<dyn LogStore>,
    stream: String,
}

impl OutboxProducer {
    pub fn new(log: Arc<dyn LogStore>, stream: String) -> Self {
        debug!(stream = %stream, "initialized OutboxProducer");
        Self { log, stream }
    }
}

#[async_trait]
impl EnvelopeProducer for OutboxProducer {
    #[instrument(skip(self, envelope), fields(stream = %self.stream, sender = %envelope.sender()))]
    async fn publish(&self, envelope: &Envelope) -> DomainResult<EntryId> {
        let payload = envelope.to_payload()?;

        let id = self
            .log
            .append(&self.stream, vec![(PAYLOAD_FIELD.to_string(), payload)])
            .await
            .map_err(DomainError::LogUnavailable)?;

        debug!(entry_id = %id, "appended envelope to outbox");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MockLogStore;

    #[tokio::test]
    async fn test_publish_appends_single_data_field() {
        let envelope = Envelope::new("alice", "hi").unwrap();
        let expected_payload = envelope.to_payload().unwrap();

        let mut mock_log = MockLogStore::new();
        mock_log
            .expect_append()
            .withf(move |stream: &str, fields: &Vec<(String, String)>| {
                stream == "chat_messages_stream"
                    && fields.len() == 1
                    && fields[0].0 == PAYLOAD_FIELD
                    && fields[0].1 == expected_payload
            })
            .times(1)
            .returning(|_, _| Ok(EntryId::new(1_700_000_000_000, 0)));

        let producer = OutboxProducer::new(Arc::new(mock_log), "chat_messages_stream".to_string());
        let id = producer.publish(&envelope).await.unwrap();

        assert_eq!(id, EntryId::new(1_700_000_000_000, 0));
    }

    #[tokio::test]
    async fn test_publish_failure_is_log_unavailable() {
        let mut mock_log = MockLogStore::new();
        mock_log
            .expect_append()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));

        let producer = OutboxProducer::new(Arc::new(mock_log), "chat_messages_stream".to_string());
        let envelope = Envelope::new("alice", "hi").unwrap();

        let result = producer.publish(&envelope).await;
        assert!(matches!(result, Err(DomainError::LogUnavailable(_))));
    }
}
