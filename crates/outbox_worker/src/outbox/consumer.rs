use crate::outbox::{ConsumeRequest, ConsumeResponse, RetryPolicy, PAYLOAD_FIELD};
use common::log_store::{
    EntryId, GroupCreation, GroupStart, LogEntry, LogStore, ReadCursor, ReadGroupRequest,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(1000);
pub const DEFAULT_READ_FAILURE_BACKOFF: Duration = Duration::from_millis(5000);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct OutboxConsumerConfig {
    pub stream: String,
    pub group: String,
    /// Distinct names within one group share the load; processes sharing a
    /// name act as one consumer and share one pending entries list
    pub consumer_name: String,
    pub batch_size: usize,
    pub block: Duration,
    pub read_failure_backoff: Duration,
    /// Minimum time between the starts of two replay passes over pending entries
    pub retry_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl OutboxConsumerConfig {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer_name: consumer_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            block: DEFAULT_BLOCK,
            read_failure_backoff: DEFAULT_READ_FAILURE_BACKOFF,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to create consumer group {group} on {stream}: {source:#}")]
    GroupCreate {
        stream: String,
        group: String,
        source: anyhow::Error,
    },

    #[error("failed to read from {stream}: {source:#}")]
    Read {
        stream: String,
        source: anyhow::Error,
    },
}

/// Counts for one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub delivered: usize,
    pub acknowledged: usize,
    pub retained: usize,
    pub dropped: usize,
    pub dead_lettered: usize,
}

enum Disposition {
    Acknowledge,
    Retain(String),
}

/// Group consumer that moves outbox entries into the store of record.
///
/// An entry is acknowledged only after the per-entry service reports it
/// persisted or unrecoverable; anything else stays in the group's pending
/// entries list. Pending entries are replayed on startup and, once an entry
/// has been left behind, again at most once per `retry_interval`. Each pass
/// delivers every pending entry once, so delivery counts grow with elapsed
/// time rather than with traffic.
/// Delivery is at-least-once: a crash between persisting and acknowledging
/// persists the entry again on the next replay.
pub struct OutboxConsumer<S> {
    log: Arc<dyn LogStore>,
    config: OutboxConsumerConfig,
    service: S,
    /// Position of an in-progress replay pass over this consumer's pending entries
    replay_after: Option<EntryId>,
    /// An entry was left pending since the last replay pass started
    replay_due: bool,
    last_replay_started: Instant,
}

impl<S> OutboxConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    /// Ensure the consumer group exists, positioned at new entries only.
    ///
    /// An existing group is reused. Any other creation failure is fatal.
    pub async fn new(
        log: Arc<dyn LogStore>,
        config: OutboxConsumerConfig,
        service: S,
    ) -> Result<Self, ConsumerError> {
        debug!(
            stream = %config.stream,
            group = %config.group,
            consumer = %config.consumer_name,
            "creating outbox consumer"
        );

        match log
            .create_group(&config.stream, &config.group, GroupStart::NewEntriesOnly)
            .await
        {
            GroupCreation::Created => {
                info!(stream = %config.stream, group = %config.group, "created consumer group");
            }
            GroupCreation::AlreadyExists => {
                info!(stream = %config.stream, group = %config.group, "consumer group already exists");
            }
            GroupCreation::Failed(source) => {
                return Err(ConsumerError::GroupCreate {
                    stream: config.stream.clone(),
                    group: config.group.clone(),
                    source,
                });
            }
        }

        Ok(Self {
            log,
            config,
            service,
            replay_after: Some(EntryId::ZERO),
            replay_due: false,
            last_replay_started: Instant::now(),
        })
    }

    /// Read once and process whatever was delivered
    pub async fn poll_once(&mut self) -> Result<PollReport, ConsumerError> {
        let cursor = self.next_cursor();
        let entries = self.read(cursor).await?;
        Ok(self.process_batch(cursor, entries).await)
    }

    /// Poll until `ctx` is cancelled.
    ///
    /// Cancellation interrupts a blocking read or a backoff sleep, never the
    /// processing of entries already delivered.
    pub async fn run(mut self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            "starting outbox consumer"
        );

        loop {
            if ctx.is_cancelled() {
                break;
            }

            let cursor = self.next_cursor();
            let read = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                result = self.read(cursor) => result,
            };

            match read {
                Ok(entries) => {
                    self.process_batch(cursor, entries).await;
                }
                Err(e) => {
                    error!(
                        consumer = %self.config.consumer_name,
                        error = %e,
                        backoff_ms = self.config.read_failure_backoff.as_millis(),
                        "read failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(self.config.read_failure_backoff) => {}
                    }
                }
            }
        }

        info!(
            stream = %self.config.stream,
            consumer = %self.config.consumer_name,
            "outbox consumer stopped gracefully"
        );
        Ok(())
    }

    fn next_cursor(&self) -> ReadCursor {
        match self.replay_after {
            Some(after) => ReadCursor::PendingAfter(after),
            None => ReadCursor::Undelivered,
        }
    }

    async fn read(&self, cursor: ReadCursor) -> Result<Vec<LogEntry>, ConsumerError> {
        let block = match cursor {
            ReadCursor::Undelivered => Some(self.config.block),
            ReadCursor::PendingAfter(_) => None,
        };

        let request = ReadGroupRequest {
            stream: self.config.stream.clone(),
            group: self.config.group.clone(),
            consumer: self.config.consumer_name.clone(),
            cursor,
            count: self.config.batch_size.max(1),
            block,
        };

        self.log
            .read_group(request)
            .await
            .map_err(|source| ConsumerError::Read {
                stream: self.config.stream.clone(),
                source,
            })
    }

    /// Process delivered entries strictly in order, then advance replay state.
    ///
    /// A replay pass walks this consumer's pending entries until a read comes
    /// back empty. Entries left pending meanwhile are picked up by the next
    /// pass, which starts after the first undelivered read issued once
    /// `retry_interval` has passed since the previous pass started.
    async fn process_batch(&mut self, cursor: ReadCursor, entries: Vec<LogEntry>) -> PollReport {
        let mut report = PollReport {
            delivered: entries.len(),
            ..Default::default()
        };

        if let ReadCursor::PendingAfter(_) = cursor {
            match entries.last() {
                Some(last) => self.replay_after = Some(last.id),
                None => {
                    debug!(consumer = %self.config.consumer_name, "replay pass complete");
                    self.replay_after = None;
                }
            }
        }

        if !entries.is_empty() {
            debug!(
                entry_count = entries.len(),
                replay = matches!(cursor, ReadCursor::PendingAfter(_)),
                "received entries"
            );
        }

        for entry in entries {
            if self.process_entry(entry, &mut report).await {
                self.replay_due = true;
            }
        }

        if cursor == ReadCursor::Undelivered
            && self.replay_due
            && self.last_replay_started.elapsed() >= self.config.retry_interval
        {
            debug!(consumer = %self.config.consumer_name, "scheduling replay of pending entries");
            self.replay_after = Some(EntryId::ZERO);
            self.replay_due = false;
            self.last_replay_started = Instant::now();
        }

        report
    }

    /// Returns true when the entry was left in the pending entries list
    async fn process_entry(&mut self, entry: LogEntry, report: &mut PollReport) -> bool {
        let entry_id = entry.id;
        let payload = entry.payload(PAYLOAD_FIELD).map(str::to_string);
        let request = ConsumeRequest::new(entry_id, payload.clone());

        let response = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };

        let disposition = match response {
            Ok(ConsumeResponse::Ack { .. }) => {
                report.acknowledged += 1;
                Disposition::Acknowledge
            }
            Ok(ConsumeResponse::Drop(reason)) => {
                warn!(entry_id = %entry_id, reason = %reason, "dropping entry");
                report.dropped += 1;
                Disposition::Acknowledge
            }
            Ok(ConsumeResponse::Retain(reason)) => Disposition::Retain(reason.to_string()),
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "service error processing entry");
                Disposition::Retain(format!("service error: {:#}", e))
            }
        };

        match disposition {
            Disposition::Acknowledge => !self.acknowledge(entry_id).await,
            Disposition::Retain(reason) => {
                if self.dead_letter(entry_id, payload, &reason).await {
                    report.dead_lettered += 1;
                    !self.acknowledge(entry_id).await
                } else {
                    report.retained += 1;
                    true
                }
            }
        }
    }

    /// Returns false when the ack failed and the entry is still pending
    async fn acknowledge(&self, entry_id: EntryId) -> bool {
        match self
            .log
            .ack(&self.config.stream, &self.config.group, entry_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "failed to acknowledge entry");
                false
            }
        }
    }

    /// Copy a failing entry to the dead-letter stream once its delivery
    /// budget is spent. Returns true when the caller should acknowledge it.
    async fn dead_letter(&self, entry_id: EntryId, payload: Option<String>, reason: &str) -> bool {
        if self.config.retry_policy == RetryPolicy::Unbounded {
            return false;
        }

        let pending = match self
            .log
            .pending_entry(&self.config.stream, &self.config.group, entry_id)
            .await
        {
            Ok(Some(pending)) => pending,
            Ok(None) => return false,
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "failed to look up delivery count");
                return false;
            }
        };

        let Some(target) = self
            .config
            .retry_policy
            .dead_letter_target(pending.delivery_count)
        else {
            return false;
        };

        let fields = vec![
            (PAYLOAD_FIELD.to_string(), payload.unwrap_or_default()),
            ("reason".to_string(), reason.to_string()),
            ("source_id".to_string(), entry_id.to_string()),
        ];

        match self.log.append(target, fields).await {
            Ok(dead_letter_id) => {
                warn!(
                    entry_id = %entry_id,
                    dead_letter_id = %dead_letter_id,
                    dead_letter_stream = %target,
                    delivery_count = pending.delivery_count,
                    reason = %reason,
                    "moved entry to dead-letter stream"
                );
                true
            }
            Err(e) => {
                error!(
                    entry_id = %entry_id,
                    dead_letter_stream = %target,
                    error = %e,
                    "failed to dead-letter entry, leaving it pending"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::RetainReason;
    use common::log_store::PendingEntry;
    use common::MockLogStore;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::HashMap;
    use tower::service_fn;

    const STREAM: &str = "chat_messages_stream";
    const GROUP: &str = "chat_persistence_group";

    fn config() -> OutboxConsumerConfig {
        let mut config = OutboxConsumerConfig::new(STREAM, GROUP, "chat_persistence_consumer");
        config.read_failure_backoff = Duration::from_millis(10);
        config
    }

    fn entry(millis: u64, payload: Option<&str>) -> LogEntry {
        let mut fields = HashMap::new();
        if let Some(p) = payload {
            fields.insert(PAYLOAD_FIELD.to_string(), p.to_string());
        }
        LogEntry::new(EntryId::new(millis, 0), fields)
    }

    #[derive(Clone)]
    struct AckAll;

    impl Service<ConsumeRequest> for AckAll {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = futures::future::Ready<anyhow::Result<ConsumeResponse>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            futures::future::ready(Ok(ConsumeResponse::ack(1)))
        }
    }

    fn acking_service() -> AckAll {
        AckAll
    }

    fn expect_group(mock_log: &mut MockLogStore) {
        mock_log
            .expect_create_group()
            .with(eq(STREAM), eq(GROUP), eq(GroupStart::NewEntriesOnly))
            .times(1)
            .returning(|_, _, _| GroupCreation::Created);
    }

    #[tokio::test]
    async fn test_existing_group_is_not_an_error() {
        let mut mock_log = MockLogStore::new();
        mock_log
            .expect_create_group()
            .times(1)
            .returning(|_, _, _| GroupCreation::AlreadyExists);

        let consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service()).await;
        assert!(consumer.is_ok());
    }

    #[tokio::test]
    async fn test_group_create_failure_is_fatal() {
        let mut mock_log = MockLogStore::new();
        mock_log
            .expect_create_group()
            .times(1)
            .returning(|_, _, _| GroupCreation::Failed(anyhow::anyhow!("WRONGTYPE")));
        mock_log.expect_read_group().times(0);

        let result = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service()).await;
        assert!(matches!(result, Err(ConsumerError::GroupCreate { .. })));
    }

    #[tokio::test]
    async fn test_startup_replays_pending_before_blocking_read() {
        let mut seq = Sequence::new();
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .withf(|r: &ReadGroupRequest| {
                r.cursor == ReadCursor::PendingAfter(EntryId::ZERO) && r.block.is_none()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        mock_log
            .expect_read_group()
            .withf(|r: &ReadGroupRequest| {
                r.cursor == ReadCursor::Undelivered
                    && r.block == Some(DEFAULT_BLOCK)
                    && r.count == 1
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));

        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service())
            .await
            .unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), PollReport::default());
        assert_eq!(consumer.poll_once().await.unwrap(), PollReport::default());
    }

    #[tokio::test]
    async fn test_acked_after_successful_processing() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Ok(vec![entry(5, Some("{}"))]));
        mock_log
            .expect_ack()
            .with(eq(STREAM), eq(GROUP), eq(EntryId::new(5, 0)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service())
            .await
            .unwrap();
        let report = consumer.poll_once().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_retained_entry_is_not_acked() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Ok(vec![entry(5, Some("garbage"))]));
        mock_log.expect_ack().times(0);

        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::retain(RetainReason::Decode(
                "bad".to_string(),
            )))
        });
        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), config(), service)
            .await
            .unwrap();
        let report = consumer.poll_once().await.unwrap();

        assert_eq!(report.retained, 1);
        assert_eq!(report.acknowledged, 0);
    }

    #[tokio::test]
    async fn test_service_error_leaves_entry_pending_and_continues_batch() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Ok(vec![entry(5, Some("first")), entry(6, Some("second"))]));
        mock_log
            .expect_ack()
            .with(eq(STREAM), eq(GROUP), eq(EntryId::new(6, 0)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_fn(|req: ConsumeRequest| async move {
            if req.payload.as_deref() == Some("first") {
                Err(anyhow::anyhow!("unexpected"))
            } else {
                Ok::<_, anyhow::Error>(ConsumeResponse::ack(2))
            }
        });
        let mut cfg = config();
        cfg.batch_size = 2;
        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), cfg, service)
            .await
            .unwrap();
        let report = consumer.poll_once().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.retained, 1);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service())
            .await
            .unwrap();

        let result = consumer.poll_once().await;
        assert!(matches!(result, Err(ConsumerError::Read { .. })));
    }

    #[tokio::test]
    async fn test_read_failure_keeps_replay_position() {
        let mut seq = Sequence::new();
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        mock_log
            .expect_read_group()
            .withf(|r: &ReadGroupRequest| r.cursor == ReadCursor::PendingAfter(EntryId::ZERO))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));

        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service())
            .await
            .unwrap();

        assert!(consumer.poll_once().await.is_err());
        assert!(consumer.poll_once().await.is_ok());
    }

    /// Startup replay, then one delivery whose entry stays pending, then a
    /// third read that is either a new replay pass or another undelivered read
    fn retaining_log(replay_expected: bool) -> MockLogStore {
        let mut seq = Sequence::new();
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .withf(|r: &ReadGroupRequest| r.cursor == ReadCursor::PendingAfter(EntryId::ZERO))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        mock_log
            .expect_read_group()
            .withf(|r: &ReadGroupRequest| r.cursor == ReadCursor::Undelivered)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![entry(5, Some("{}"))]));
        let third_cursor = if replay_expected {
            ReadCursor::PendingAfter(EntryId::ZERO)
        } else {
            ReadCursor::Undelivered
        };
        mock_log
            .expect_read_group()
            .withf(move |r: &ReadGroupRequest| r.cursor == third_cursor)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        mock_log.expect_ack().times(0);
        mock_log
    }

    #[tokio::test]
    async fn test_replay_waits_for_retry_interval() {
        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::retain(RetainReason::Persistence(
                "connection refused".to_string(),
            )))
        });
        let mut cfg = config();
        cfg.retry_interval = Duration::from_secs(3600);
        let mut consumer = OutboxConsumer::new(Arc::new(retaining_log(false)), cfg, service)
            .await
            .unwrap();

        let mut retained = 0;
        for _ in 0..3 {
            retained += consumer.poll_once().await.unwrap().retained;
        }
        assert_eq!(retained, 1);
    }

    #[tokio::test]
    async fn test_replay_scheduled_once_retry_interval_elapsed() {
        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::retain(RetainReason::Persistence(
                "connection refused".to_string(),
            )))
        });
        let mut cfg = config();
        cfg.retry_interval = Duration::ZERO;
        let mut consumer = OutboxConsumer::new(Arc::new(retaining_log(true)), cfg, service)
            .await
            .unwrap();

        let mut retained = 0;
        for _ in 0..3 {
            retained += consumer.poll_once().await.unwrap().retained;
        }
        assert_eq!(retained, 1);
    }

    #[tokio::test]
    async fn test_exhausted_entry_is_dead_lettered_then_acked() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Ok(vec![entry(5, Some("garbage"))]));
        mock_log
            .expect_pending_entry()
            .times(1)
            .returning(|_, _, id| {
                Ok(Some(PendingEntry {
                    id,
                    consumer: "chat_persistence_consumer".to_string(),
                    delivery_count: 3,
                }))
            });
        mock_log
            .expect_append()
            .withf(|stream: &str, fields: &Vec<(String, String)>| {
                stream == "chat_messages_dead_letter"
                    && fields.contains(&(PAYLOAD_FIELD.to_string(), "garbage".to_string()))
                    && fields.contains(&("source_id".to_string(), "5-0".to_string()))
            })
            .times(1)
            .returning(|_, _| Ok(EntryId::new(9, 0)));
        mock_log
            .expect_ack()
            .with(eq(STREAM), eq(GROUP), eq(EntryId::new(5, 0)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::retain(RetainReason::Decode(
                "bad".to_string(),
            )))
        });
        let mut cfg = config();
        cfg.retry_policy = RetryPolicy::from_settings(3, "chat_messages_dead_letter");
        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), cfg, service)
            .await
            .unwrap();
        let report = consumer.poll_once().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.retained, 0);
    }

    #[tokio::test]
    async fn test_failed_dead_letter_append_keeps_entry_pending() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log
            .expect_read_group()
            .times(1)
            .returning(|_| Ok(vec![entry(5, Some("garbage"))]));
        mock_log.expect_pending_entry().times(1).returning(|_, _, id| {
            Ok(Some(PendingEntry {
                id,
                consumer: "chat_persistence_consumer".to_string(),
                delivery_count: 10,
            }))
        });
        mock_log
            .expect_append()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));
        mock_log.expect_ack().times(0);

        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::retain(RetainReason::Decode(
                "bad".to_string(),
            )))
        });
        let mut cfg = config();
        cfg.retry_policy = RetryPolicy::from_settings(3, "chat_messages_dead_letter");
        let mut consumer = OutboxConsumer::new(Arc::new(mock_log), cfg, service)
            .await
            .unwrap();
        let report = consumer.poll_once().await.unwrap();

        assert_eq!(report.retained, 1);
        assert_eq!(report.dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_run_returns_when_already_cancelled() {
        let mut mock_log = MockLogStore::new();
        expect_group(&mut mock_log);
        mock_log.expect_read_group().times(0);

        let consumer = OutboxConsumer::new(Arc::new(mock_log), config(), acking_service())
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(consumer.run(ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_blocking_read() {
        let log = Arc::new(common::log_store::InMemoryLogStore::new());
        let mut cfg = config();
        cfg.block = Duration::from_secs(30);
        let consumer = OutboxConsumer::new(log, cfg, acking_service())
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let log = Arc::new(common::log_store::InMemoryLogStore::new());
        let mut cfg = config();
        cfg.read_failure_backoff = Duration::from_secs(30);
        let consumer = OutboxConsumer::new(log.clone(), cfg, acking_service())
            .await
            .unwrap();
        log.fail_next_reads(1);

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.failed_reads(), 1);
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }
}
