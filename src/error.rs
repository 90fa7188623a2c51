//! Failure taxonomy for the ingestion pipeline.
//!
//! The queue owns retry policy, so every failure a worker can produce is
//! classified up front as retryable (transient I/O, flaky parsers, busy
//! engines) or non-retryable (bad locators, unsupported formats). Workers
//! never inspect error messages to decide what to do next, only the class.

/// A classified ingestion failure.
#[derive(Debug, Clone)]
pub enum IngestError {
    /// Locator failed pre-admission validation (unreachable, missing file).
    Validation(String),
    /// Content type has no extraction path. Retrying cannot help.
    UnsupportedFormat(String),
    /// Transient network failure: timeout, connect error, non-2xx fetch.
    Transport(String),
    /// Parser or OCR failure while turning bytes into text.
    Extraction(String),
    /// Embedding backend failure (rate limit, server error, network).
    Embedding(String),
    /// Engine or scratch-space failure (OCR workspace, temp files, store).
    Resource(String),
}

impl IngestError {
    /// Whether the queue should schedule another attempt for this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::Validation(_) | IngestError::UnsupportedFormat(_)
        )
    }

    /// Short class label used in job records and logs.
    pub fn class(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::UnsupportedFormat(_) => "unsupported-format",
            IngestError::Transport(_) => "transport",
            IngestError::Extraction(_) => "extraction",
            IngestError::Embedding(_) => "embedding",
            IngestError::Resource(_) => "resource",
        }
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Validation(e) => write!(f, "locator validation failed: {}", e),
            IngestError::UnsupportedFormat(ct) => write!(f, "unsupported content type: {}", ct),
            IngestError::Transport(e) => write!(f, "transport failure: {}", e),
            IngestError::Extraction(e) => write!(f, "text extraction failed: {}", e),
            IngestError::Embedding(e) => write!(f, "embedding failed: {}", e),
            IngestError::Resource(e) => write!(f, "resource failure: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}
