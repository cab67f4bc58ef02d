use crate::nats::traits::NatsPublisher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct NatsClient {
    client: async_nats::Client,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Successfully connected to NATS");
        Ok(Self { client })
    }

    /// Create a NatsPublisher trait object from this client
    pub fn create_publisher_client(&self) -> Arc<dyn NatsPublisher> {
        Arc::new(NatsCorePublisher::new(self.client.clone()))
    }

    /// Flush buffered publishes; the connection closes when the last clone drops
    pub async fn close(self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            tracing::warn!(error = %e, "Failed to flush NATS connection");
        }
    }
}

/// Concrete implementation of NatsPublisher using async-nats
pub struct NatsCorePublisher {
    client: async_nats::Client,
}

impl NatsCorePublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NatsPublisher for NatsCorePublisher {
    #[instrument(skip(self, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        self.client
            .publish(subject, payload)
            .await
            .context("Failed to publish message to NATS")?;
        Ok(())
    }
}
