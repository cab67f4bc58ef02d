use crate::domain::{DomainResult, Envelope, LiveBroadcaster};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// In-process fan-out to locally connected peers.
///
/// Each peer holds a receiver from [`InProcessBroadcaster::subscribe`]. A peer
/// that falls more than `capacity` messages behind observes a lag error on its
/// receiver and skips ahead.
pub struct InProcessBroadcaster {
    sender: broadcast::Sender<Envelope>,
}

impl InProcessBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn peer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl LiveBroadcaster for InProcessBroadcaster {
    async fn broadcast(&self, envelope: &Envelope) -> DomainResult<()> {
        // No connected peers is not a failure
        let delivered = self.sender.send(envelope.clone()).unwrap_or(0);
        debug!(peers = delivered, "broadcast message in-process");
        Ok(())
    }
}
