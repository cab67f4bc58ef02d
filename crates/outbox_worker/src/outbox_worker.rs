use crate::domain::ChatService;
use crate::outbox::{
    run_demo_producer, ConsumeLoggingLayer, ConsumeLoggingService, DemoProducerConfig,
    OutboxConsumer, OutboxConsumerConfig, OutboxProducer, PersistenceService,
};
use common::domain::{LiveBroadcaster, MessageRepository};
use common::log_store::LogStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

/// Per-entry service stack of the outbox consumer
type OutboxLayeredService = ConsumeLoggingService<PersistenceService>;

pub type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub type WorkerProcess = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

pub struct OutboxWorkerConfig {
    pub consumer: OutboxConsumerConfig,
    /// Submit synthetic messages on an interval when set
    pub demo_producer: Option<DemoProducerConfig>,
}

/// Collaborators of the outbox worker.
///
/// The producer and consumer take separate log store handles so a blocking
/// group read never delays an append.
pub struct OutboxDependencies {
    pub producer_log: Arc<dyn LogStore>,
    pub consumer_log: Arc<dyn LogStore>,
    pub repository: Arc<dyn MessageRepository>,
    pub broadcaster: Arc<dyn LiveBroadcaster>,
}

pub struct OutboxWorker {
    consumer: OutboxConsumer<OutboxLayeredService>,
    chat_service: Arc<ChatService>,
    demo_producer: Option<DemoProducerConfig>,
}

impl OutboxWorker {
    pub async fn new(deps: OutboxDependencies, config: OutboxWorkerConfig) -> anyhow::Result<Self> {
        info!("Initializing outbox worker");

        let producer = Arc::new(OutboxProducer::new(
            deps.producer_log,
            config.consumer.stream.clone(),
        ));
        let chat_service = Arc::new(ChatService::new(
            deps.broadcaster,
            producer,
            deps.repository.clone(),
        ));

        let service = ServiceBuilder::new()
            .layer(ConsumeLoggingLayer::new())
            .service(PersistenceService::new(deps.repository));
        let consumer = OutboxConsumer::new(deps.consumer_log, config.consumer, service).await?;

        info!("Outbox worker initialized");

        Ok(Self {
            consumer,
            chat_service,
            demo_producer: config.demo_producer,
        })
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, WorkerProcess)> {
        let consumer = self.consumer;
        let consumer_process: WorkerProcess =
            Box::new(move |ctx| -> ProcessFuture { Box::pin(consumer.run(ctx)) });
        let mut processes = vec![("outbox_consumer", consumer_process)];

        if let Some(config) = self.demo_producer {
            let chat_service = self.chat_service;
            let demo_process: WorkerProcess = Box::new(move |ctx| -> ProcessFuture {
                Box::pin(run_demo_producer(ctx, config, chat_service))
            });
            processes.push(("demo_producer", demo_process));
        }

        processes
    }
}
