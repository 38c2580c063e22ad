//! Database migrations
//!
//! Versioned SQLite schema, applied automatically on connection and tracked
//! in the `_migrations` table.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: run checkpoints
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS run_checkpoints (
        run_id TEXT PRIMARY KEY NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('running', 'awaiting_review', 'completed', 'failed', 'cancelled')),
        state_json TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );
"#;

/// Migration 2: listing indexes
const MIGRATION_V2: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_run_checkpoints_updated_at ON run_checkpoints(updated_at);
    CREATE INDEX IF NOT EXISTS idx_run_checkpoints_status ON run_checkpoints(status);
"#;

const MIGRATIONS: &[(i32, &str, &str)] = &[
    (1, "Run checkpoints", MIGRATION_V1),
    (2, "Checkpoint listing indexes", MIGRATION_V2),
];

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    for (version, name, sql) in MIGRATIONS {
        if current_version < *version {
            tracing::info!(version, "Applying migration: {}", name);
            sqlx::raw_sql(sql).execute(pool).await?;
            record_migration(pool, *version).await?;
        }
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}
