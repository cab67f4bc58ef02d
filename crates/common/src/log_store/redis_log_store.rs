use crate::log_store::{
    EntryId, GroupCreation, GroupStart, LogEntry, LogStore, PendingEntry, ReadCursor,
    ReadGroupRequest,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Redis Streams implementation of [`LogStore`].
///
/// The connection manager reconnects on its own after the server goes away, so
/// a consumer that keeps polling resumes once Redis is reachable again. A
/// blocking `XREADGROUP` occupies the connection until it returns; give the
/// producer and the consumer separate instances.
#[derive(Clone)]
pub struct RedisLogStore {
    conn: ConnectionManager,
}

impl RedisLogStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to Redis");

        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .context("Timed out connecting to Redis")?
            .context("Failed to connect to Redis")?;

        info!("Successfully connected to Redis");
        Ok(Self { conn })
    }

    /// Verify the server answers
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }
}

/// `BLOCK 0` waits forever, so sub-millisecond blocks wait one millisecond
fn block_millis(block: Duration) -> usize {
    (block.as_millis() as usize).max(1)
}

fn parse_entry(id: &str, map: HashMap<String, redis::Value>) -> Result<LogEntry> {
    let id: EntryId = id.parse()?;
    let mut fields = HashMap::with_capacity(map.len());
    for (name, value) in map {
        let value: String = redis::from_redis_value(&value)
            .with_context(|| format!("Non-string field '{}' in entry {}", name, id))?;
        fields.insert(name, value);
    }
    Ok(LogEntry::new(id, fields))
}

fn parse_pending(reply: StreamPendingCountReply) -> Result<Vec<PendingEntry>> {
    reply
        .ids
        .into_iter()
        .map(|pending| {
            Ok(PendingEntry {
                id: pending.id.parse()?,
                consumer: pending.consumer,
                delivery_count: pending.times_delivered as u64,
            })
        })
        .collect()
}

#[async_trait]
impl LogStore for RedisLogStore {
    #[instrument(skip(self, fields), fields(stream = %stream, field_count = fields.len()))]
    async fn append(&self, stream: &str, fields: Vec<(String, String)>) -> Result<EntryId> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(stream, "*", fields.as_slice())
            .await
            .context("XADD failed")?;
        id.parse()
    }

    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> GroupCreation {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = conn
            .xgroup_create_mkstream(stream, group, start.as_arg())
            .await;

        match result {
            Ok(()) => GroupCreation::Created,
            Err(e) if e.code() == Some("BUSYGROUP") => GroupCreation::AlreadyExists,
            Err(e) => GroupCreation::Failed(anyhow::Error::new(e).context("XGROUP CREATE failed")),
        }
    }

    async fn read_group(&self, request: ReadGroupRequest) -> Result<Vec<LogEntry>> {
        let mut conn = self.conn.clone();

        let mut options = StreamReadOptions::default()
            .group(&request.group, &request.consumer)
            .count(request.count.max(1));
        if let (ReadCursor::Undelivered, Some(block)) = (request.cursor, request.block) {
            options = options.block(block_millis(block));
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(
                &[request.stream.as_str()],
                &[request.cursor.as_arg()],
                &options,
            )
            .await
            .context("XREADGROUP failed")?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                entries.push(parse_entry(&stream_id.id, stream_id.map)?);
            }
        }

        debug!(
            stream = %request.stream,
            cursor = %request.cursor.as_arg(),
            entry_count = entries.len(),
            "read from consumer group"
        );
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .xack(stream, group, &[id.to_string()])
            .await
            .context("XACK failed")?;
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", count)
            .await
            .context("XPENDING failed")?;
        parse_pending(reply)
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>> {
        let mut conn = self.conn.clone();
        let id_arg = id.to_string();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, &id_arg, &id_arg, 1)
            .await
            .context("XPENDING failed")?;
        Ok(parse_pending(reply)?.into_iter().find(|p| p.id == id))
    }
}
