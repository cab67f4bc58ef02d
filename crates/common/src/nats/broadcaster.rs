use crate::domain::{DomainError, DomainResult, Envelope, LiveBroadcaster};
use crate::nats::traits::NatsPublisher;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Fans envelopes out to every process subscribed to a NATS subject.
///
/// Core NATS gives no persistence and no replay: peers that are not connected
/// when a message is published never see it here and must catch up through the
/// store of record.
pub struct NatsBroadcaster {
    publisher: Arc<dyn NatsPublisher>,
    subject: String,
}

impl NatsBroadcaster {
    pub fn new(publisher: Arc<dyn NatsPublisher>, subject: String) -> Self {
        Self { publisher, subject }
    }
}

#[async_trait]
impl LiveBroadcaster for NatsBroadcaster {
    async fn broadcast(&self, envelope: &Envelope) -> DomainResult<()> {
        let payload = envelope.to_payload()?;

        self.publisher
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(DomainError::BroadcastFailure)?;

        debug!(subject = %self.subject, sender = %envelope.sender(), "broadcast message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::traits::MockNatsPublisher;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_broadcast_publishes_payload_on_subject() {
        let envelope = Envelope::new("alice", "hi").unwrap();
        let expected = Bytes::from(envelope.to_payload().unwrap());

        let mut mock_publisher = MockNatsPublisher::new();
        mock_publisher
            .expect_publish()
            .withf(move |subject: &String, payload: &Bytes| {
                subject == "chat.messages" && payload == &expected
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let broadcaster =
            NatsBroadcaster::new(Arc::new(mock_publisher), "chat.messages".to_string());

        assert!(broadcaster.broadcast(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_typed() {
        let mut mock_publisher = MockNatsPublisher::new();
        mock_publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("connection closed")));

        let broadcaster =
            NatsBroadcaster::new(Arc::new(mock_publisher), "chat.messages".to_string());
        let envelope = Envelope::new("alice", "hi").unwrap();

        let result = broadcaster.broadcast(&envelope).await;
        assert!(matches!(result, Err(DomainError::BroadcastFailure(_))));
    }
}
