#![cfg(feature = "integration-tests")]

use chrono::{TimeZone, Utc};
use common::domain::{Envelope, MessageRepository};
use common::postgres::{run_migrations, PostgresClient, PostgresConfig, PostgresMessageRepository};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    run_migrations(&client).await.expect("Migrations failed");

    (postgres, client)
}

fn envelope_at(sender: &str, content: &str, secs: i64) -> Envelope {
    let timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    Envelope::with_timestamp(sender, content, timestamp).unwrap()
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_migrations_apply_once() {
    let (_container, client) = setup_test_db().await;

    let applied = run_migrations(&client).await.unwrap();

    assert!(applied.is_empty());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_store_assigns_increasing_ids() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresMessageRepository::new(client);

    let first = repo.store(&envelope_at("alice", "hi", 0)).await.unwrap();
    let second = repo.store(&envelope_at("bob", "hello", 1)).await.unwrap();

    assert!(second.storage_id > first.storage_id);
    assert_eq!(first.envelope.sender(), "alice");
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_recent_returns_newest_first_with_limit() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresMessageRepository::new(client);

    for i in 0..5 {
        repo.store(&envelope_at("alice", &format!("message {}", i), i))
            .await
            .unwrap();
    }

    let recent = repo.recent(3).await.unwrap();

    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].envelope.content(), "message 4");
    assert_eq!(recent[2].envelope.content(), "message 2");
    assert_eq!(
        recent[0].envelope.timestamp(),
        Utc.timestamp_opt(1_700_000_004, 0).unwrap()
    );
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_duplicate_envelopes_are_stored_twice() {
    let (_container, client) = setup_test_db().await;
    let repo = PostgresMessageRepository::new(client);
    let envelope = envelope_at("alice", "same", 0);

    let first = repo.store(&envelope).await.unwrap();
    let second = repo.store(&envelope).await.unwrap();

    assert_ne!(first.storage_id, second.storage_id);
    assert_eq!(repo.recent(10).await.unwrap().len(), 2);
}
