//! Durable ingestion queue with bounded retry and exponential backoff.
//!
//! Jobs live in the `jobs` table; claiming is a conditional write, so any
//! number of workers can pull from the same queue without double-processing.
//! Admission is cheap (one validation probe plus two inserts) and never
//! blocks on extraction work. Terminal results are delivered to in-process
//! submitters over per-job oneshot channels rather than event-bus callbacks;
//! lifecycle and audit effects run as ordinary continuations in the worker.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::audit;
use crate::config::QueueConfig;
use crate::error::IngestError;
use crate::fetch::Fetcher;
use crate::lifecycle;
use crate::models::{
    DocFormat, Job, JobOutcome, JobState, Locator, QueueStatus, SubmissionReport,
    SubmissionResult, SubmissionStatus,
};

/// Handle returned per admitted job. The receiver resolves once the job
/// reaches a terminal state in this process.
pub struct JobHandle {
    pub job_id: String,
    pub document_id: String,
    pub outcome: oneshot::Receiver<JobOutcome>,
}

/// What the queue decided to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Rescheduled; the job re-enters `waiting` after the given delay.
    Retried { delay_ms: u64 },
    /// Out of attempts or non-retryable: the job is `failed`.
    Terminal,
}

pub struct IngestionQueue {
    pool: SqlitePool,
    config: QueueConfig,
    notifiers: Mutex<HashMap<String, oneshot::Sender<JobOutcome>>>,
}

impl IngestionQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig) -> IngestionQueue {
        IngestionQueue {
            pool,
            config,
            notifiers: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a batch of locators. Each item is validated and admitted
    /// independently; an invalid locator is reported in its slot and never
    /// aborts the rest of the batch.
    pub async fn submit(
        &self,
        fetcher: &Fetcher,
        locators: &[String],
        principal_id: &str,
    ) -> Result<(SubmissionReport, Vec<JobHandle>)> {
        let mut results = Vec::with_capacity(locators.len());
        let mut handles = Vec::new();
        let mut admitted = 0usize;

        for raw in locators {
            match self.admit_one(fetcher, raw, principal_id).await? {
                Admission::Queued {
                    result,
                    handle,
                } => {
                    admitted += 1;
                    results.push(result);
                    handles.push(handle);
                }
                Admission::Rejected(result) => results.push(result),
            }
        }

        audit::record(
            &self.pool,
            principal_id,
            "batch_submitted",
            "batch",
            None,
            serde_json::json!({
                "total_submitted": locators.len(),
                "admitted": admitted,
            }),
        )
        .await;

        Ok((
            SubmissionReport {
                total_submitted: locators.len(),
                admitted,
                results,
            },
            handles,
        ))
    }

    async fn admit_one(
        &self,
        fetcher: &Fetcher,
        raw: &str,
        principal_id: &str,
    ) -> Result<Admission> {
        let locator = Locator::parse(raw);
        let validation = fetcher.validate(&locator).await;
        if !validation.valid {
            return Ok(Admission::Rejected(SubmissionResult {
                locator: raw.to_string(),
                status: SubmissionStatus::Invalid,
                content_type: None,
                content_length: None,
                job_id: None,
                document_id: None,
                error: validation.error,
            }));
        }

        let content_type = validation
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        // Format support is decided here, once. Unsupported formats are still
        // admitted and fail on their first attempt, without retries.
        let format = DocFormat::from_content_type(&content_type);

        // One non-terminal job per document id: a duplicate submission of an
        // in-flight locator is rejected, not queued twice.
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE locator = ?")
                .bind(raw)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(doc_id) = &existing {
            if self.has_active_job(doc_id).await? {
                return Ok(Admission::Rejected(SubmissionResult {
                    locator: raw.to_string(),
                    status: SubmissionStatus::Invalid,
                    content_type: Some(content_type),
                    content_length: validation.content_length,
                    job_id: None,
                    document_id: Some(doc_id.clone()),
                    error: Some("already queued for processing".to_string()),
                }));
            }
        }

        let document_id = lifecycle::register(
            &self.pool,
            raw,
            &locator.file_name(),
            &content_type,
            &format,
        )
        .await?;

        let job_id = Uuid::new_v4().to_string();
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, document_id, locator, principal_id, format, content_type,
                              file_name, state, attempts, max_attempts, next_attempt_at, enqueued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'waiting', 0, ?, ?, ?)
            "#,
        )
        .bind(&job_id)
        .bind(&document_id)
        .bind(raw)
        .bind(principal_id)
        .bind(format.as_token())
        .bind(&content_type)
        .bind(locator.file_name())
        .bind(self.config.max_attempts as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let (tx, rx) = oneshot::channel();
        self.notifiers
            .lock()
            .expect("notifier lock poisoned")
            .insert(job_id.clone(), tx);

        Ok(Admission::Queued {
            result: SubmissionResult {
                locator: raw.to_string(),
                status: SubmissionStatus::Queued,
                content_type: Some(content_type),
                content_length: validation.content_length,
                job_id: Some(job_id.clone()),
                document_id: Some(document_id.clone()),
                error: None,
            },
            handle: JobHandle {
                job_id,
                document_id,
                outcome: rx,
            },
        })
    }

    /// Claim the next due waiting job, if any. The claim is a conditional
    /// write, so losing a race to another worker just means trying the next
    /// candidate. Claiming counts the attempt.
    pub async fn claim_due(&self) -> Result<Option<Job>> {
        loop {
            let candidate: Option<String> = sqlx::query_scalar(
                r#"
                SELECT id FROM jobs
                WHERE state = 'waiting' AND next_attempt_at <= ?
                ORDER BY next_attempt_at ASC, enqueued_at ASC
                LIMIT 1
                "#,
            )
            .bind(now_ms())
            .fetch_optional(&self.pool)
            .await?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE jobs SET state = 'active', attempts = attempts + 1 WHERE id = ? AND state = 'waiting'",
            )
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                return self.load_job(&id).await;
            }
        }
    }

    /// Terminal success for an active job.
    pub async fn record_success(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'completed', finished_at = ?, last_error = NULL WHERE id = ? AND state = 'active'",
        )
        .bind(now_ms())
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        self.notify(JobOutcome {
            job_id: job.id.clone(),
            document_id: job.document_id.clone(),
            state: JobState::Completed,
            attempts: job.attempts,
            error: None,
        });
        Ok(())
    }

    /// Handle a failed attempt: reschedule with backoff while the error is
    /// retryable and attempts remain, otherwise mark the job failed.
    pub async fn record_failure(
        &self,
        job: &Job,
        error: &IngestError,
    ) -> Result<FailureDisposition> {
        let message = error.to_string();

        if error.is_retryable() && job.attempts < job.max_attempts {
            let delay_ms = self.backoff_delay_ms(job.attempts);
            sqlx::query(
                "UPDATE jobs SET state = 'waiting', next_attempt_at = ?, last_error = ? WHERE id = ? AND state = 'active'",
            )
            .bind(now_ms() + delay_ms as i64)
            .bind(&message)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
            return Ok(FailureDisposition::Retried { delay_ms });
        }

        sqlx::query(
            "UPDATE jobs SET state = 'failed', finished_at = ?, last_error = ? WHERE id = ? AND state = 'active'",
        )
        .bind(now_ms())
        .bind(&message)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        self.notify(JobOutcome {
            job_id: job.id.clone(),
            document_id: job.document_id.clone(),
            state: JobState::Failed,
            attempts: job.attempts,
            error: Some(message),
        });
        Ok(FailureDisposition::Terminal)
    }

    /// Backoff before attempt `attempt + 1`: `base · 2^(attempt-1)`, capped.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let base_ms = self.config.backoff_base_secs.saturating_mul(1000);
        let cap_ms = self.config.backoff_cap_secs.saturating_mul(1000);
        let shift = attempt.saturating_sub(1).min(20);
        base_ms.saturating_mul(1u64 << shift).min(cap_ms)
    }

    /// Point-in-time counters across all job states.
    pub async fn status(&self) -> Result<QueueStatus> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut status = QueueStatus::default();
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            let n = n as u64;
            match state.as_str() {
                "waiting" => status.waiting = n,
                "active" => status.active = n,
                "completed" => status.completed = n,
                "failed" => status.failed = n,
                _ => {}
            }
            status.total += n;
        }
        Ok(status)
    }

    /// Jobs that still need worker time (waiting or active).
    pub async fn pending(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE state IN ('waiting', 'active')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    pub async fn job_details(&self, job_id: &str) -> Result<Option<Job>> {
        self.load_job(job_id).await
    }

    /// Drop waiting and terminal jobs, keeping whatever is actively running.
    /// Returns the number of jobs removed.
    pub async fn clear(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE state IN ('waiting', 'completed', 'failed')")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn has_active_job(&self, document_id: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE document_id = ? AND state IN ('waiting', 'active')",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, locator, principal_id, format, content_type, file_name,
                   state, attempts, max_attempts, next_attempt_at, enqueued_at, finished_at, last_error
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.get("state");
        let format: String = row.get("format");
        let attempts: i64 = row.get("attempts");
        let max_attempts: i64 = row.get("max_attempts");
        Ok(Some(Job {
            id: row.get("id"),
            document_id: row.get("document_id"),
            locator: row.get("locator"),
            principal_id: row.get("principal_id"),
            format: DocFormat::from_token(&format),
            content_type: row.get("content_type"),
            file_name: row.get("file_name"),
            state: JobState::from_str(&state)
                .ok_or_else(|| anyhow::anyhow!("unknown job state: {}", state))?,
            attempts: attempts as u32,
            max_attempts: max_attempts as u32,
            next_attempt_at: row.get("next_attempt_at"),
            enqueued_at: row.get("enqueued_at"),
            finished_at: row.get("finished_at"),
            last_error: row.get("last_error"),
        }))
    }

    fn notify(&self, outcome: JobOutcome) {
        let sender = self
            .notifiers
            .lock()
            .expect("notifier lock poisoned")
            .remove(&outcome.job_id);
        if let Some(tx) = sender {
            // The submitter may have dropped its handle; that's fine.
            let _ = tx.send(outcome);
        }
    }
}

enum Admission {
    Queued {
        result: SubmissionResult,
        handle: JobHandle,
    },
    Rejected(SubmissionResult),
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
