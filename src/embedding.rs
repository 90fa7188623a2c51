//! Embedding backends and vector codecs.
//!
//! Supports the OpenAI embeddings API and a local Ollama instance, selected
//! by configuration. Each call makes a single attempt: backend failures
//! surface as retryable [`IngestError::Embedding`] and the ingestion queue
//! owns the backoff between attempts.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::IngestError;

/// Embed a document's extracted text.
///
/// Returns `Ok(None)` when the provider is disabled; ingestion proceeds
/// without a vector. With a configured provider, any failure is a retryable
/// embedding error.
pub async fn embed_document(
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Option<Vec<f32>>, IngestError> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => embed_openai(config, text).await.map(Some),
        "ollama" => embed_ollama(config, text).await.map(Some),
        other => Err(IngestError::Embedding(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Call the OpenAI embeddings API (`POST /v1/embeddings`).
async fn embed_openai(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>, IngestError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| IngestError::Embedding("OPENAI_API_KEY not set".to_string()))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| IngestError::Embedding("embedding.model required".to_string()))?;

    let client = client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": [text],
    });

    let resp = client
        .post("https://api.openai.com/v1/embeddings")
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| IngestError::Embedding(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body_text = resp.text().await.unwrap_or_default();
        return Err(IngestError::Embedding(format!(
            "OpenAI API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| IngestError::Embedding(e.to_string()))?;
    parse_openai_response(&json)
}

/// Parse the OpenAI embeddings response: `data[0].embedding`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, IngestError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| IngestError::Embedding("invalid OpenAI response: missing embedding".to_string()))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Call a local Ollama instance's `POST /api/embed` endpoint.
async fn embed_ollama(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>, IngestError> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| IngestError::Embedding("embedding.model required".to_string()))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": [text],
    });

    let resp = client
        .post(format!("{}/api/embed", url))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            IngestError::Embedding(format!("Ollama connection error (is Ollama running at {}?): {}", url, e))
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body_text = resp.text().await.unwrap_or_default();
        return Err(IngestError::Embedding(format!(
            "Ollama API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| IngestError::Embedding(e.to_string()))?;
    parse_ollama_response(&json)
}

/// Parse the Ollama embed response: `embeddings[0]`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, IngestError> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            IngestError::Embedding("invalid Ollama response: missing embeddings array".to_string())
        })?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn client(timeout_secs: u64) -> Result<reqwest::Client, IngestError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::Embedding(e.to_string()))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes) for SQLite
/// storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[tokio::test]
    async fn disabled_provider_skips_embedding() {
        let config = EmbeddingConfig::default();
        let result = embed_document(&config, "some text").await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn parse_openai_shape() {
        let json = serde_json::json!({
            "data": [{ "embedding": [0.25, -1.0, 2.0] }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.25, -1.0, 2.0]);

        let bad = serde_json::json!({ "data": [] });
        assert!(parse_openai_response(&bad).is_err());
    }

    #[test]
    fn parse_ollama_shape() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.75]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![0.5, 0.75]);

        let bad = serde_json::json!({ "embeddings": "nope" });
        assert!(parse_ollama_response(&bad).is_err());
    }
}
