//! Worker pool: claims due jobs, runs the per-document pipeline, and applies
//! terminal effects (lifecycle write, cache population, audit) as ordinary
//! sequential continuations.
//!
//! The pipeline per job is the original ingestion flow: claim → download →
//! extract → embed → atomic complete → cache. Failures are classified by the
//! error taxonomy and handed to the queue, which owns retry and backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

use crate::audit;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::embedding;
use crate::error::IngestError;
use crate::extract::ContentExtractor;
use crate::fetch::Fetcher;
use crate::lifecycle;
use crate::models::{DocumentSnapshot, Job, Locator};
use crate::queue::{FailureDisposition, IngestionQueue};

/// Everything a worker needs, shared across the pool.
pub struct PipelineContext {
    pub config: Config,
    pub queue: Arc<IngestionQueue>,
    pub extractor: Arc<ContentExtractor>,
    pub cache: Arc<CacheStore>,
    pub fetcher: Fetcher,
}

/// Run the worker pool. With `drain`, returns once no waiting or active jobs
/// remain; otherwise runs until interrupted. The OCR engine is released on
/// the way out in both modes.
pub async fn run_workers(ctx: Arc<PipelineContext>, drain: bool) -> Result<()> {
    let workers = ctx.config.queue.workers;
    tracing::info!(workers, drain, "starting worker pool");

    let mut pool = JoinSet::new();
    for worker_id in 0..workers {
        let ctx = Arc::clone(&ctx);
        pool.spawn(async move { worker_loop(ctx, worker_id, drain).await });
    }

    let run_result: Result<()> = if drain {
        let mut first_err = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined? {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown signal received, stopping workers");
        pool.abort_all();
        while pool.join_next().await.is_some() {}
        Ok(())
    };

    ctx.extractor.shutdown().await;
    run_result
}

async fn worker_loop(ctx: Arc<PipelineContext>, worker_id: usize, drain: bool) -> Result<()> {
    loop {
        match ctx.queue.claim_due().await? {
            Some(job) => process_claimed(&ctx, job).await?,
            None => {
                if drain && ctx.queue.pending().await? == 0 {
                    tracing::debug!(worker_id, "queue drained");
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(ctx.config.queue.poll_interval_ms)).await;
            }
        }
    }
}

/// Drive one claimed job to a scheduling decision and apply its effects.
async fn process_claimed(ctx: &PipelineContext, job: Job) -> Result<()> {
    tracing::info!(
        job_id = %job.id,
        locator = %job.locator,
        attempt = job.attempts,
        "processing job"
    );

    match process_document(ctx, &job).await {
        Ok(text_length) => {
            ctx.queue.record_success(&job).await?;
            audit::record(
                ctx.queue.pool(),
                &job.principal_id,
                "ingest_completed",
                "document",
                Some(&job.document_id),
                serde_json::json!({
                    "locator": job.locator,
                    "text_length": text_length,
                    "attempts": job.attempts,
                }),
            )
            .await;
            tracing::info!(job_id = %job.id, text_length, "job completed");
        }
        Err(error) => match ctx.queue.record_failure(&job, &error).await? {
            FailureDisposition::Retried { delay_ms } => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    delay_ms,
                    "attempt failed, retrying: {}",
                    error
                );
            }
            FailureDisposition::Terminal => {
                if let Err(e) =
                    lifecycle::fail(ctx.queue.pool(), &job.document_id, &error.to_string()).await
                {
                    tracing::warn!(document_id = %job.document_id, "failure transition refused: {}", e);
                }
                audit::record(
                    ctx.queue.pool(),
                    &job.principal_id,
                    "ingest_failed",
                    "document",
                    Some(&job.document_id),
                    serde_json::json!({
                        "locator": job.locator,
                        "error": error.to_string(),
                        "error_class": error.class(),
                        "attempts": job.attempts,
                    }),
                )
                .await;
                tracing::error!(job_id = %job.id, attempts = job.attempts, "job failed: {}", error);
            }
        },
    }
    Ok(())
}

/// The per-document pipeline. Returns the extracted text length on success.
async fn process_document(ctx: &PipelineContext, job: &Job) -> Result<usize, IngestError> {
    lifecycle::mark_processing(ctx.queue.pool(), &job.document_id)
        .await
        .map_err(|e| IngestError::Resource(e.to_string()))?;

    let locator = Locator::parse(&job.locator);
    let file = ctx.fetcher.download(&locator).await?;
    let size = file.bytes.len() as u64;

    let text = ctx.extractor.extract(file.bytes, &job.format).await?;

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let text_hash = format!("{:x}", hasher.finalize());

    let vector = embedding::embed_document(&ctx.config.embedding, &text).await?;
    let blob = vector.as_ref().map(|v| embedding::vec_to_blob(v));

    lifecycle::complete(
        ctx.queue.pool(),
        &job.document_id,
        text.len() as i64,
        &text_hash,
        blob.as_deref(),
    )
    .await
    .map_err(|e| IngestError::Resource(e.to_string()))?;

    // Cache population is best-effort; a cold cache never fails the job.
    let snapshot = DocumentSnapshot {
        document_id: job.document_id.clone(),
        title: Some(job.file_name.clone()),
        locator: job.locator.clone(),
        content_type: job.content_type.clone(),
        state: "processed".to_string(),
        size: Some(size),
    };
    if let Err(e) = ctx.cache.put(&job.document_id, &snapshot, None).await {
        tracing::warn!(document_id = %job.document_id, "cache population failed: {}", e);
    }

    Ok(text.len())
}
