mod config;
mod telemetry;

use anyhow::Context;
use chatline_runner::Runner;
use common::broadcast::InProcessBroadcaster;
use common::domain::InMemoryMessageRepository;
use common::log_store::{InMemoryLogStore, RedisLogStore};
use common::nats::{NatsBroadcaster, NatsClient};
use common::postgres::{run_migrations, PostgresClient, PostgresConfig, PostgresMessageRepository};
use config::ServiceConfig;
use outbox_worker::{
    DemoProducerConfig, OutboxConsumerConfig, OutboxDependencies, OutboxWorker,
    OutboxWorkerConfig, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{init_telemetry, TelemetryConfig};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        log_level: config.log_level.clone(),
        log_format: config.log_format.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {:#}", e);
        std::process::exit(1);
    }

    info!(
        in_memory = config.in_memory,
        consumer = %config.consumer_name,
        "Starting chatline-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    if let Err(e) = run(config).await {
        error!("Service failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let shared = initialize_shared_dependencies(&config).await?;

    let worker = OutboxWorker::new(shared.outbox, outbox_worker_config(&config))
        .await
        .context("failed to initialize outbox worker")?;

    let mut runner = Runner::new();
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    if let Some(nats_client) = shared.nats_client {
        runner = runner.with_closer("nats", move || async move {
            nats_client.close().await;
            Ok(())
        });
    }

    runner
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await
}

struct SharedDependencies {
    outbox: OutboxDependencies,
    nats_client: Option<NatsClient>,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    if config.in_memory {
        info!("Using in-memory log store, message store and broadcaster");
        let log = Arc::new(InMemoryLogStore::new());
        return Ok(SharedDependencies {
            outbox: OutboxDependencies {
                producer_log: log.clone(),
                consumer_log: log,
                repository: Arc::new(InMemoryMessageRepository::new()),
                broadcaster: Arc::new(InProcessBroadcaster::new(1024)),
            },
            nats_client: None,
        });
    }

    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);

    // PostgreSQL initialization
    info!("Initializing PostgreSQL...");
    let postgres_client = PostgresClient::new(&PostgresConfig {
        host: config.postgres_host.clone(),
        port: config.postgres_port,
        database: config.postgres_database.clone(),
        username: config.postgres_username.clone(),
        password: config.postgres_password.clone(),
        max_pool_size: config.postgres_max_pool_size,
    })?;
    tokio::time::timeout(startup_timeout, postgres_client.ping())
        .await
        .context("timed out connecting to PostgreSQL")??;
    let applied = run_migrations(&postgres_client).await?;
    info!(applied = ?applied, "PostgreSQL migrations complete");

    // Redis initialization, one connection each so blocking reads never delay appends
    info!("Initializing Redis...");
    let producer_log = RedisLogStore::connect(&config.redis_url, startup_timeout).await?;
    let consumer_log = RedisLogStore::connect(&config.redis_url, startup_timeout).await?;
    tokio::time::timeout(startup_timeout, producer_log.ping())
        .await
        .context("timed out pinging Redis")??;

    // NATS initialization
    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(&config.nats_url, startup_timeout).await?;
    let broadcaster = NatsBroadcaster::new(
        nats_client.create_publisher_client(),
        config.broadcast_subject.clone(),
    );

    Ok(SharedDependencies {
        outbox: OutboxDependencies {
            producer_log: Arc::new(producer_log),
            consumer_log: Arc::new(consumer_log),
            repository: Arc::new(PostgresMessageRepository::new(postgres_client)),
            broadcaster: Arc::new(broadcaster),
        },
        nats_client: Some(nats_client),
    })
}

fn outbox_worker_config(config: &ServiceConfig) -> OutboxWorkerConfig {
    let mut consumer =
        OutboxConsumerConfig::new(&config.stream, &config.group, &config.consumer_name);
    consumer.batch_size = config.batch_size;
    consumer.block = Duration::from_millis(config.block_ms);
    consumer.read_failure_backoff = Duration::from_millis(config.read_failure_backoff_ms);
    consumer.retry_interval = Duration::from_millis(config.retry_interval_ms);
    consumer.retry_policy = RetryPolicy::from_settings(
        config.dead_letter_max_deliveries,
        config.dead_letter_stream.clone(),
    );

    let demo_producer = config.demo_producer_enabled.then(|| DemoProducerConfig {
        interval: Duration::from_secs(config.demo_producer_interval_secs),
        ..Default::default()
    });

    OutboxWorkerConfig {
        consumer,
        demo_producer,
    }
}
