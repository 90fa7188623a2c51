//! Per-document processing state machine.
//!
//! States move `registered → processing → {processed | error}` and never
//! backward within one job. Every transition is a single conditional
//! `UPDATE … WHERE state = …` (compare-and-set) so two workers can never
//! race a document into an inconsistent state, and `processed` is written in
//! the same statement as the content vector so a reader never observes
//! extracted-but-not-embedded as processed.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{DocFormat, Document, DocumentState};

/// Create the document record for an admitted locator, or re-register an
/// existing one for a fresh job lineage. Returns the document id.
///
/// Callers must have verified that the document has no non-terminal job; that
/// is what makes re-registration a brand-new lineage rather than a backward
/// transition.
pub async fn register(
    pool: &SqlitePool,
    locator: &str,
    title: &str,
    content_type: &str,
    format: &DocFormat,
) -> Result<String> {
    let now = chrono::Utc::now().timestamp();

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE locator = ?")
        .bind(locator)
        .fetch_optional(pool)
        .await?;

    if let Some(id) = existing {
        sqlx::query(
            r#"
            UPDATE documents
            SET state = 'registered', title = ?, content_type = ?, format = ?,
                error_reason = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(content_type)
        .bind(format.as_token())
        .bind(now)
        .bind(&id)
        .execute(pool)
        .await?;
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO documents (id, locator, title, content_type, format, state, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'registered', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(locator)
    .bind(title)
    .bind(content_type)
    .bind(format.as_token())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// `registered → processing`, when a worker claims the job. Also matches
/// `processing` so a retry of the same job is a no-op rather than an error.
pub async fn mark_processing(pool: &SqlitePool, document_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents SET state = 'processing', updated_at = ?
        WHERE id = ? AND state IN ('registered', 'processing')
        "#,
    )
    .bind(chrono::Utc::now().timestamp())
    .bind(document_id)
    .execute(pool)
    .await?;

    if result.rows_affected() != 1 {
        bail!("document {} is not claimable from its current state", document_id);
    }
    Ok(())
}

/// `processing → processed`. Status, text length, hash, and vector land in
/// one atomic statement.
pub async fn complete(
    pool: &SqlitePool,
    document_id: &str,
    text_length: i64,
    text_hash: &str,
    content_vector: Option<&[u8]>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET state = 'processed', text_length = ?, text_hash = ?, content_vector = ?,
            error_reason = NULL, updated_at = ?
        WHERE id = ? AND state = 'processing'
        "#,
    )
    .bind(text_length)
    .bind(text_hash)
    .bind(content_vector)
    .bind(chrono::Utc::now().timestamp())
    .bind(document_id)
    .execute(pool)
    .await?;

    if result.rows_affected() != 1 {
        bail!("document {} was not in 'processing' at completion", document_id);
    }
    Ok(())
}

/// Terminal failure with a human-readable reason for callers polling the
/// document.
pub async fn fail(pool: &SqlitePool, document_id: &str, reason: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents SET state = 'error', error_reason = ?, updated_at = ?
        WHERE id = ? AND state IN ('registered', 'processing')
        "#,
    )
    .bind(reason)
    .bind(chrono::Utc::now().timestamp())
    .bind(document_id)
    .execute(pool)
    .await?;

    if result.rows_affected() != 1 {
        bail!("document {} was already terminal at failure", document_id);
    }
    Ok(())
}

pub async fn load(pool: &SqlitePool, document_id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT id, locator, title, content_type, state, text_length, error_reason,
               created_at, updated_at
        FROM documents WHERE id = ?
        "#,
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let state: String = row.get("state");
    Ok(Some(Document {
        id: row.get("id"),
        locator: row.get("locator"),
        title: row.get("title"),
        content_type: row.get("content_type"),
        state: DocumentState::from_str(&state)
            .ok_or_else(|| anyhow::anyhow!("unknown document state: {}", state))?,
        text_length: row.get("text_length"),
        error_reason: row.get("error_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("t.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn happy_path_is_monotonic() {
        let (_dir, pool) = test_pool().await;
        let id = register(&pool, "/x/a.pdf", "a.pdf", "application/pdf", &DocFormat::Pdf)
            .await
            .unwrap();

        mark_processing(&pool, &id).await.unwrap();
        complete(&pool, &id, 42, "deadbeef", None).await.unwrap();

        let doc = load(&pool, &id).await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Processed);
        assert_eq!(doc.text_length, Some(42));
    }

    #[tokio::test]
    async fn completion_requires_processing_state() {
        let (_dir, pool) = test_pool().await;
        let id = register(&pool, "/x/b.pdf", "b.pdf", "application/pdf", &DocFormat::Pdf)
            .await
            .unwrap();

        // Still 'registered': the conditional write must refuse.
        assert!(complete(&pool, &id, 1, "h", None).await.is_err());
    }

    #[tokio::test]
    async fn terminal_states_cannot_move_backward() {
        let (_dir, pool) = test_pool().await;
        let id = register(&pool, "/x/c.pdf", "c.pdf", "application/pdf", &DocFormat::Pdf)
            .await
            .unwrap();
        mark_processing(&pool, &id).await.unwrap();
        complete(&pool, &id, 7, "h", None).await.unwrap();

        assert!(mark_processing(&pool, &id).await.is_err());
        assert!(fail(&pool, &id, "late failure").await.is_err());
        let doc = load(&pool, &id).await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Processed);
    }

    #[tokio::test]
    async fn re_registration_starts_a_fresh_lineage() {
        let (_dir, pool) = test_pool().await;
        let id = register(&pool, "/x/d.pdf", "d.pdf", "application/pdf", &DocFormat::Pdf)
            .await
            .unwrap();
        mark_processing(&pool, &id).await.unwrap();
        fail(&pool, &id, "network down").await.unwrap();

        let id2 = register(&pool, "/x/d.pdf", "d.pdf", "application/pdf", &DocFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(id, id2, "re-registration keeps the document identity");

        let doc = load(&pool, &id).await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::Registered);
        assert!(doc.error_reason.is_none());
    }
}
