use crate::domain::{ChatService, SubmitMessageRequest};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct DemoProducerConfig {
    /// Interval between submitted messages
    pub interval: Duration,
    pub sender: String,
}

impl Default for DemoProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            sender: "demo-bot".to_string(),
        }
    }
}

/// Submit a numbered synthetic message every `config.interval` until cancelled.
///
/// Submission errors are logged and the loop carries on.
pub async fn run_demo_producer(
    ctx: CancellationToken,
    config: DemoProducerConfig,
    chat_service: Arc<ChatService>,
) -> Result<()> {
    info!(sender = %config.sender, "Demo producer service started");

    let mut sequence: u64 = 0;
    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("Received shutdown signal, stopping demo producer");
                break;
            }
            _ = tokio::time::sleep(config.interval) => {
                sequence += 1;
                let request = SubmitMessageRequest {
                    sender: config.sender.clone(),
                    content: format!("demo message #{}", sequence),
                };

                match chat_service.submit(request).await {
                    Ok(submitted) => {
                        debug!(entry_id = %submitted.entry_id, sequence, "submitted demo message");
                    }
                    Err(e) => {
                        error!(sequence, error = %e, "Failed to submit demo message");
                    }
                }
            }
        }
    }

    info!("Demo producer service stopped gracefully");
    Ok(())
}
