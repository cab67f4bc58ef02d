use crate::outbox::{ConsumeRequest, ConsumeResponse, RetainReason};
use common::domain::{Envelope, MessageRepository};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service persisting one outbox entry to the store of record.
///
/// This service:
/// 1. Drops entries without a data field (acknowledged, never retried)
/// 2. Decodes the envelope, retaining the entry on failure
/// 3. Stores it, retaining the entry if the store rejects the write
/// 4. Returns Ack with the storage id on success
#[derive(Clone)]
pub struct PersistenceService {
    repository: Arc<dyn MessageRepository>,
}

impl PersistenceService {
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }
}

impl Service<ConsumeRequest> for PersistenceService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let repository = self.repository.clone();
        let entry_id = req.entry_id;

        Box::pin(async move {
            let Some(payload) = req.payload else {
                warn!(entry_id = %entry_id, "entry has no payload, dropping");
                return Ok(ConsumeResponse::drop_entry("entry has no payload field"));
            };

            let envelope = match Envelope::from_payload(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(
                        entry_id = %entry_id,
                        error = %e,
                        "failed to decode envelope"
                    );
                    return Ok(ConsumeResponse::retain(RetainReason::Decode(e.to_string())));
                }
            };

            match repository.store(&envelope).await {
                Ok(stored) => {
                    debug!(
                        entry_id = %entry_id,
                        storage_id = stored.storage_id,
                        sender = %envelope.sender(),
                        "persisted envelope"
                    );
                    Ok(ConsumeResponse::ack(stored.storage_id))
                }
                Err(e) => {
                    error!(
                        entry_id = %entry_id,
                        error = %e,
                        "failed to persist envelope"
                    );
                    Ok(ConsumeResponse::retain(RetainReason::Persistence(
                        e.to_string(),
                    )))
                }
            }
        })
    }
}
