use crate::domain::{DomainError, DomainResult};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Wire rendering of [`Envelope::timestamp`]: UTC with fixed microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// A single chat message as it moves through the pipeline.
///
/// Envelopes are immutable: fields are only readable through accessors and the
/// timestamp is fixed when the envelope is created. Both constructors reject
/// empty or whitespace-only `sender`/`content`, so an invalid envelope can never
/// be appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    sender: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create a new envelope stamped with the current UTC time
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> DomainResult<Self> {
        Self::with_timestamp(sender, content, Utc::now())
    }

    /// Create an envelope with an explicit timestamp (rehydration and replay)
    pub fn with_timestamp(
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let sender = sender.into();
        let content = content.into();

        if sender.trim().is_empty() {
            return Err(DomainError::InvalidEnvelope(
                "sender must not be empty".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(DomainError::InvalidEnvelope(
                "content must not be empty".to_string(),
            ));
        }

        Ok(Self {
            sender,
            content,
            // The wire format and the store of record both keep microseconds
            timestamp: timestamp.trunc_subsecs(6),
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize into the single opaque payload carried by a log entry
    pub fn to_payload(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|e| DomainError::InvalidEnvelope(e.to_string()))
    }

    /// Decode a log entry payload back into a validated envelope
    pub fn from_payload(payload: &str) -> DomainResult<Self> {
        serde_json::from_str(payload).map_err(|e| DomainError::EnvelopeDecode(e.to_string()))
    }
}

/// Persisted form of an envelope with its storage identity.
///
/// `storage_id` is assigned by the store of record and is unrelated to the log
/// entry id the envelope travelled under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub storage_id: i64,
    pub envelope: Envelope,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    sender: String,
    content: String,
    timestamp: String,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = DomainError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&wire.timestamp)
            .map_err(|e| DomainError::EnvelopeDecode(format!("invalid timestamp: {}", e)))?
            .with_timezone(&Utc);

        Envelope::with_timestamp(wire.sender, wire.content, timestamp)
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            timestamp: envelope.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            sender: envelope.sender,
            content: envelope.content,
        }
    }
}
