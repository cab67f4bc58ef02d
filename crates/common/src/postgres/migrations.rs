use crate::postgres::PostgresClient;
use thiserror::Error;
use tracing::{debug, info};

/// Advisory lock key serialising migrations across replicas
const MIGRATION_LOCK_KEY: i64 = 0x6368_6174_6c69;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_chat_messages",
    sql: include_str!("../../migrations/postgres/00001_create_chat_messages.sql"),
}];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to acquire connection: {0:#}")]
    Connection(anyhow::Error),

    #[error("migration {version} failed: {source}")]
    Apply {
        version: i64,
        #[source]
        source: tokio_postgres::Error,
    },
}

/// Applies the embedded schema migrations in version order.
///
/// Applied versions are recorded in `schema_migrations`; each migration runs in
/// its own transaction and is skipped once recorded.
pub async fn run_migrations(client: &PostgresClient) -> Result<Vec<i64>, MigrationError> {
    let mut conn = client
        .get_connection()
        .await
        .map_err(MigrationError::Connection)?;

    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .await
    .map_err(|source| MigrationError::Apply { version: 0, source })?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let apply_err = |source| MigrationError::Apply {
            version: migration.version,
            source,
        };

        let tx = conn.transaction().await.map_err(apply_err)?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATION_LOCK_KEY])
            .await
            .map_err(apply_err)?;

        let existing = tx
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[&migration.version],
            )
            .await
            .map_err(apply_err)?;
        if existing.is_some() {
            debug!(version = migration.version, "migration already applied");
            continue;
        }

        tx.batch_execute(migration.sql).await.map_err(apply_err)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .await
        .map_err(apply_err)?;
        tx.commit().await.map_err(apply_err)?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied.push(migration.version);
    }

    Ok(applied)
}
