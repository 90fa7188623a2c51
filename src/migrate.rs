use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Documents: the system of record for ingestion state. `content_vector`
    // and `state = 'processed'` are always written in the same statement.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            locator TEXT NOT NULL UNIQUE,
            title TEXT,
            content_type TEXT NOT NULL,
            format TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'registered',
            text_length INTEGER,
            text_hash TEXT,
            content_vector BLOB,
            error_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Jobs: durable queue entries. Timestamps are unix millis so backoff
    // scheduling keeps sub-second resolution.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            locator TEXT NOT NULL,
            principal_id TEXT NOT NULL,
            format TEXT NOT NULL,
            content_type TEXT NOT NULL,
            file_name TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'waiting',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_attempt_at INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            finished_at INTEGER,
            last_error TEXT,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Access counters: independent of cache-entry TTL so popularity survives
    // expiry and eviction.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS access_stats (
            document_id TEXT PRIMARY KEY,
            hits INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            principal_id TEXT NOT NULL,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state_due ON jobs(state, next_attempt_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_document_id ON jobs(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
