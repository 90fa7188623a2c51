//! Audit trail for ingestion outcomes.
//!
//! Auditing is fire-and-forget: a failed insert is logged and swallowed so
//! it can never fail the job that produced it.

use sqlx::SqlitePool;
use uuid::Uuid;

/// Record an audit event. Never returns an error.
pub async fn record(
    pool: &SqlitePool,
    principal_id: &str,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    metadata: serde_json::Value,
) {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (id, principal_id, action, resource_type, resource_id, metadata_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(principal_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(metadata.to_string())
    .bind(now)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(action, "failed to record audit event: {}", e);
    }
}
