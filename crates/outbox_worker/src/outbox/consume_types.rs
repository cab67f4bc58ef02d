use common::log_store::EntryId;
use std::fmt;

/// A single log entry handed to the per-entry service.
///
/// `payload` is `None` when the entry carries no data field at all, which is
/// distinct from a data field whose contents fail to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRequest {
    pub entry_id: EntryId,
    pub payload: Option<String>,
}

impl ConsumeRequest {
    pub fn new(entry_id: EntryId, payload: Option<String>) -> Self {
        Self { entry_id, payload }
    }
}

/// Why an entry was left in the pending entries list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainReason {
    /// Payload present but not a valid envelope
    Decode(String),
    /// Store of record rejected the write
    Persistence(String),
}

impl fmt::Display for RetainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetainReason::Decode(detail) => write!(f, "decode failure: {}", detail),
            RetainReason::Persistence(detail) => write!(f, "persistence failure: {}", detail),
        }
    }
}

/// Disposition of an entry after processing.
///
/// `Ack` and `Drop` both acknowledge the entry; `Retain` leaves it pending
/// for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Persisted under `storage_id`
    Ack { storage_id: i64 },
    /// Unrecoverable entry, acknowledged without persisting
    Drop(String),
    Retain(RetainReason),
}

impl ConsumeResponse {
    pub fn ack(storage_id: i64) -> Self {
        Self::Ack { storage_id }
    }

    pub fn drop_entry(reason: impl Into<String>) -> Self {
        Self::Drop(reason.into())
    }

    pub fn retain(reason: RetainReason) -> Self {
        Self::Retain(reason)
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::Drop(_) => "drop",
            Self::Retain(_) => "retain",
        }
    }
}
