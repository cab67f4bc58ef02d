use crate::log_store::{
    EntryId, GroupCreation, GroupStart, LogEntry, LogStore, PendingEntry, ReadCursor,
    ReadGroupRequest,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<EntryId, HashMap<String, String>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingRecord>,
}

struct PendingRecord {
    consumer: String,
    delivery_count: u64,
}

/// In-process log store with consumer group semantics.
///
/// Mirrors the stream behaviour the outbox relies on: monotonically increasing
/// ids, a per-group delivery cursor, a per-consumer pending entries list with
/// delivery counts, and blocking reads that wake on append. Also supports fault
/// injection so the consumer's failure handling can be exercised without a
/// network.
pub struct InMemoryLogStore {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    failing_reads: AtomicUsize,
    failed_reads: AtomicUsize,
    append_available: AtomicBool,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            failing_reads: AtomicUsize::new(0),
            failed_reads: AtomicUsize::new(0),
            append_available: AtomicBool::new(true),
        }
    }

    /// Make the next `count` group reads fail as if the store were unreachable
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Total number of group reads that failed through fault injection
    pub fn failed_reads(&self) -> usize {
        self.failed_reads.load(Ordering::SeqCst)
    }

    /// Toggle whether appends succeed
    pub fn set_append_available(&self, available: bool) {
        self.append_available.store(available, Ordering::SeqCst);
    }

    /// Remove an entry's data while leaving any pending deliveries in place
    pub async fn delete(&self, stream: &str, id: EntryId) -> bool {
        let mut streams = self.streams.lock().await;
        streams
            .get_mut(stream)
            .map(|s| s.entries.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Number of entries retained in a stream
    pub async fn len(&self, stream: &str) -> usize {
        let streams = self.streams.lock().await;
        streams.get(stream).map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Fields of a retained entry
    pub async fn entry(&self, stream: &str, id: EntryId) -> Option<HashMap<String, String>> {
        let streams = self.streams.lock().await;
        streams.get(stream).and_then(|s| s.entries.get(&id).cloned())
    }

    /// All retained entries of a stream in id order, outside any group
    pub async fn entries(&self, stream: &str) -> Vec<LogEntry> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| LogEntry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_injected_read_failure(&self) -> bool {
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            self.failed_reads.fetch_add(1, Ordering::SeqCst);
        }
        injected
    }

    fn next_id(last: EntryId) -> EntryId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        if now > last.millis {
            EntryId::new(now, 0)
        } else {
            EntryId::new(last.millis, last.seq + 1)
        }
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn no_group(stream: &str, group: &str) -> anyhow::Error {
    anyhow!(
        "NOGROUP no such key '{}' or consumer group '{}'",
        stream,
        group
    )
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<EntryId> {
        if !self.append_available.load(Ordering::SeqCst) {
            bail!("log store unavailable: append rejected");
        }

        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let id = Self::next_id(state.last_id);
            state.last_id = id;
            state.entries.insert(id, fields.into_iter().collect());
            id
        };

        debug!(stream = %stream, entry_id = %id, "appended entry");
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> GroupCreation {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return GroupCreation::AlreadyExists;
        }

        let last_delivered = match start {
            GroupStart::NewEntriesOnly => state.last_id,
            GroupStart::Beginning => EntryId::ZERO,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        GroupCreation::Created
    }

    async fn read_group(&self, request: ReadGroupRequest) -> Result<Vec<LogEntry>> {
        if self.take_injected_read_failure() {
            bail!("log store unreachable");
        }

        let count = request.count.max(1);
        let deadline = request.block.map(|block| Instant::now() + block);

        loop {
            // Register for wakeups before inspecting state so no append is missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut streams = self.streams.lock().await;
                let state = streams
                    .get_mut(&request.stream)
                    .ok_or_else(|| no_group(&request.stream, &request.group))?;
                let group = state
                    .groups
                    .get_mut(&request.group)
                    .ok_or_else(|| no_group(&request.stream, &request.group))?;

                match request.cursor {
                    ReadCursor::PendingAfter(after) => {
                        let mut entries = Vec::new();
                        for (id, record) in group
                            .pending
                            .range_mut((Excluded(after), Unbounded))
                            .filter(|(_, record)| record.consumer == request.consumer)
                            .take(count)
                        {
                            record.delivery_count += 1;
                            let fields = state.entries.get(id).cloned().unwrap_or_default();
                            entries.push(LogEntry::new(*id, fields));
                        }
                        return Ok(entries);
                    }
                    ReadCursor::Undelivered => {
                        let entries: Vec<LogEntry> = state
                            .entries
                            .range((Excluded(group.last_delivered), Unbounded))
                            .take(count)
                            .map(|(id, fields)| LogEntry::new(*id, fields.clone()))
                            .collect();

                        if !entries.is_empty() {
                            for entry in &entries {
                                group.pending.insert(
                                    entry.id,
                                    PendingRecord {
                                        consumer: request.consumer.clone(),
                                        delivery_count: 1,
                                    },
                                );
                                group.last_delivered = entry.id;
                            }
                            return Ok(entries);
                        }
                    }
                }
            }

            let Some(deadline) = deadline else {
                return Ok(Vec::new());
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<()> {
        let mut streams = self.streams.lock().await;
        if let Some(group) = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
        {
            group.pending.remove(&id);
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.lock().await;
        let group_state = streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .ok_or_else(|| no_group(stream, group))?;

        Ok(group_state
            .pending
            .iter()
            .take(count)
            .map(|(id, record)| PendingEntry {
                id: *id,
                consumer: record.consumer.clone(),
                delivery_count: record.delivery_count,
            })
            .collect())
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>> {
        let streams = self.streams.lock().await;
        let group_state = streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .ok_or_else(|| no_group(stream, group))?;

        Ok(group_state.pending.get(&id).map(|record| PendingEntry {
            id,
            consumer: record.consumer.clone(),
            delivery_count: record.delivery_count,
        }))
    }
}
