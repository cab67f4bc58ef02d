use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier assigned by the log store to an appended entry.
///
/// Rendered as `<millis>-<seq>`; ids are strictly increasing within a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    /// Position before every entry
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("malformed entry id: {}", s))?;

        Ok(Self {
            millis: millis
                .parse()
                .with_context(|| format!("malformed entry id: {}", s))?,
            seq: seq
                .parse()
                .with_context(|| format!("malformed entry id: {}", s))?,
        })
    }
}

/// An entry read from a stream within a consumer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    /// Empty when the entry was deleted while still pending
    pub fields: HashMap<String, String>,
}

impl LogEntry {
    pub fn new(id: EntryId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }

    pub fn payload(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Where a group-scoped read starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Only entries never delivered to any consumer of the group (`>`)
    Undelivered,
    /// This consumer's pending entries with ids greater than the given id
    PendingAfter(EntryId),
}

impl ReadCursor {
    pub fn as_arg(&self) -> String {
        match self {
            ReadCursor::Undelivered => ">".to_string(),
            ReadCursor::PendingAfter(id) => id.to_string(),
        }
    }
}

/// Initial position of a newly created consumer group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Skip history, deliver only entries appended after creation (`$`)
    NewEntriesOnly,
    /// Deliver the whole stream (`0`)
    Beginning,
}

impl GroupStart {
    pub fn as_arg(&self) -> &'static str {
        match self {
            GroupStart::NewEntriesOnly => "$",
            GroupStart::Beginning => "0",
        }
    }
}

/// Outcome of a consumer group creation attempt
#[derive(Debug)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
    Failed(anyhow::Error),
}

/// Parameters of a group-scoped read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGroupRequest {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub cursor: ReadCursor,
    pub count: usize,
    /// Maximum time to wait for undelivered entries; ignored for pending reads
    pub block: Option<Duration>,
}

/// An entry delivered to a consumer and not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub delivery_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_parse_and_display() {
        let id: EntryId = "1700000000000-3".parse().unwrap();
        assert_eq!(id, EntryId::new(1_700_000_000_000, 3));
        assert_eq!(id.to_string(), "1700000000000-3");
    }

    #[test]
    fn test_entry_id_rejects_malformed() {
        assert!("17000".parse::<EntryId>().is_err());
        assert!("a-1".parse::<EntryId>().is_err());
        assert!("1-b".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_id_ordering() {
        assert!(EntryId::new(5, 0) < EntryId::new(5, 1));
        assert!(EntryId::new(5, 9) < EntryId::new(6, 0));
        assert!(EntryId::ZERO < EntryId::new(0, 1));
    }

    #[test]
    fn test_cursor_args() {
        assert_eq!(ReadCursor::Undelivered.as_arg(), ">");
        assert_eq!(ReadCursor::PendingAfter(EntryId::ZERO).as_arg(), "0-0");
        assert_eq!(GroupStart::NewEntriesOnly.as_arg(), "$");
    }

    #[test]
    fn test_payload_lookup() {
        let mut fields = HashMap::new();
        fields.insert("data".to_string(), "{}".to_string());
        let entry = LogEntry::new(EntryId::new(1, 0), fields);

        assert_eq!(entry.payload("data"), Some("{}"));
        assert_eq!(entry.payload("missing"), None);
    }
}
