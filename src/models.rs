//! Core data models used throughout Bookflow.
//!
//! These types represent the locators, jobs, documents, and cache payloads
//! that flow through the ingestion pipeline.

use std::path::PathBuf;

use serde::Serialize;

/// Reference to a document to ingest: an HTTP(S) URL or a local file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Url(String),
    File(PathBuf),
}

impl Locator {
    pub fn parse(raw: &str) -> Locator {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Locator::Url(raw.to_string())
        } else {
            Locator::File(PathBuf::from(raw))
        }
    }

    /// The raw string form, as submitted and as stored.
    pub fn as_str(&self) -> &str {
        match self {
            Locator::Url(u) => u,
            Locator::File(p) => p.to_str().unwrap_or_default(),
        }
    }

    /// Trailing path segment, used as a display title for the document.
    pub fn file_name(&self) -> String {
        let raw = self.as_str();
        let no_query = raw.split(['?', '#']).next().unwrap_or(raw);
        no_query
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(no_query)
            .to_string()
    }
}

/// Raster image flavors accepted by the OCR path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }
}

/// Extraction format, resolved once at job admission and carried on the job
/// so no retry ever re-derives it from a content-type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocFormat {
    Pdf,
    Epub,
    Image(ImageKind),
    Unsupported(String),
}

impl DocFormat {
    /// Classify a content type (parameters like `; charset=` are ignored).
    pub fn from_content_type(content_type: &str) -> DocFormat {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => DocFormat::Pdf,
            "application/epub+zip" => DocFormat::Epub,
            "image/png" => DocFormat::Image(ImageKind::Png),
            "image/jpeg" | "image/jpg" => DocFormat::Image(ImageKind::Jpeg),
            _ => DocFormat::Unsupported(essence),
        }
    }

    /// Stable token persisted on the job row.
    pub fn as_token(&self) -> String {
        match self {
            DocFormat::Pdf => "pdf".to_string(),
            DocFormat::Epub => "epub".to_string(),
            DocFormat::Image(ImageKind::Png) => "image/png".to_string(),
            DocFormat::Image(ImageKind::Jpeg) => "image/jpeg".to_string(),
            DocFormat::Unsupported(ct) => format!("unsupported:{}", ct),
        }
    }

    pub fn from_token(token: &str) -> DocFormat {
        match token {
            "pdf" => DocFormat::Pdf,
            "epub" => DocFormat::Epub,
            "image/png" => DocFormat::Image(ImageKind::Png),
            "image/jpeg" => DocFormat::Image(ImageKind::Jpeg),
            other => DocFormat::Unsupported(
                other.strip_prefix("unsupported:").unwrap_or(other).to_string(),
            ),
        }
    }
}

/// Queue-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<JobState> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Document lifecycle state. Transitions are monotonic per attempt lineage:
/// `registered → processing → {processed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Registered,
    Processing,
    Processed,
    Error,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Registered => "registered",
            DocumentState::Processing => "processing",
            DocumentState::Processed => "processed",
            DocumentState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<DocumentState> {
        match s {
            "registered" => Some(DocumentState::Registered),
            "processing" => Some(DocumentState::Processing),
            "processed" => Some(DocumentState::Processed),
            "error" => Some(DocumentState::Error),
            _ => None,
        }
    }
}

/// One queued attempt to ingest a single locator.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub locator: String,
    pub principal_id: String,
    pub format: DocFormat,
    pub content_type: String,
    pub file_name: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time (unix millis) this job may be claimed.
    pub next_attempt_at: i64,
    pub enqueued_at: i64,
    pub finished_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Document record as stored in the durable store.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub locator: String,
    pub title: Option<String>,
    pub content_type: String,
    pub state: DocumentState,
    pub text_length: Option<i64>,
    pub error_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-locator admission outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Queued,
    Invalid,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Invalid => "invalid",
        }
    }
}

/// One entry of a batch submission report.
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub locator: String,
    pub status: SubmissionStatus,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub job_id: Option<String>,
    pub document_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregate outcome of a batch submission. Items are evaluated
/// independently; one invalid locator never aborts the batch.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub total_submitted: usize,
    pub admitted: usize,
    pub results: Vec<SubmissionResult>,
}

/// Point-in-time queue counters. Not transactionally consistent with
/// individual job mutations; `completed + failed` only ever grows in a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatus {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

/// Terminal result delivered to in-process submitters, one per job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub document_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Metadata snapshot cached for a document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSnapshot {
    pub document_id: String,
    pub title: Option<String>,
    pub locator: String,
    pub content_type: String,
    pub state: String,
    pub size: Option<u64>,
}
