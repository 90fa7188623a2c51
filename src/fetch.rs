//! Locator validation and retrieval.
//!
//! Two call sites, two weights: [`Fetcher::validate`] is the cheap
//! pre-admission probe (HTTP `HEAD`, no body; `fs::metadata` for files), and
//! [`Fetcher::download`] is the full fetch performed at extraction time with
//! a bounded timeout.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::error::IngestError;
use crate::models::Locator;

/// Outcome of a pre-admission locator probe.
#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub error: Option<String>,
}

impl Validation {
    fn ok(content_type: Option<String>, content_length: Option<u64>) -> Validation {
        Validation {
            valid: true,
            content_type,
            content_length,
            error: None,
        }
    }

    fn invalid(error: String) -> Validation {
        Validation {
            valid: false,
            content_type: None,
            content_length: None,
            error: Some(error),
        }
    }
}

/// A fully retrieved document body.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

/// HTTP + filesystem retrieval with a shared client and bounded timeouts.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout_secs: u64) -> Result<Fetcher> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Fetcher { client })
    }

    /// Lightweight existence/metadata check. No body is fetched.
    pub async fn validate(&self, locator: &Locator) -> Validation {
        match locator {
            Locator::Url(url) => match self.client.head(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        return Validation::invalid(format!("HTTP {}", status));
                    }
                    let content_type = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    Validation::ok(content_type, resp.content_length())
                }
                Err(e) => Validation::invalid(e.to_string()),
            },
            Locator::File(path) => match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => {
                    Validation::ok(Some(content_type_for_path(path)), Some(meta.len()))
                }
                Ok(_) => Validation::invalid(format!("not a file: {}", path.display())),
                Err(e) => Validation::invalid(format!("{}: {}", path.display(), e)),
            },
        }
    }

    /// Fetch the full document body. Timeouts, connect failures, and non-2xx
    /// responses surface as retryable [`IngestError::Transport`].
    pub async fn download(&self, locator: &Locator) -> Result<RemoteFile, IngestError> {
        match locator {
            Locator::Url(url) => {
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| IngestError::Transport(e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(IngestError::Transport(format!("HTTP {} for {}", status, url)));
                }
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| IngestError::Transport(e.to_string()))?;
                Ok(RemoteFile {
                    bytes: bytes.to_vec(),
                    content_type,
                    file_name: locator.file_name(),
                })
            }
            Locator::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| IngestError::Transport(format!("{}: {}", path.display(), e)))?;
                Ok(RemoteFile {
                    bytes,
                    content_type: content_type_for_path(path),
                    file_name: locator.file_name(),
                })
            }
        }
    }
}

/// Content type derived from the file extension, for file locators where no
/// server declares one.
pub fn content_type_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
    .to_string()
}
