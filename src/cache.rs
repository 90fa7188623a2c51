//! TTL cache with durable popularity tracking.
//!
//! Live entries are held in memory and expire by TTL; hit counters live in
//! the `access_stats` table so popularity survives entry expiry, eviction,
//! and process restarts. The two are independent axes: expiry never resets a
//! counter, and populating the cache never increments one; only a
//! successful `get` does.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::fetch::Fetcher;
use crate::models::DocumentSnapshot;

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// A popularity-ranked id joined with its canonical document record.
#[derive(Debug, Clone)]
pub struct PopularEntry {
    pub document_id: String,
    pub hits: i64,
    pub title: Option<String>,
    pub locator: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub tracked: u64,
    pub total_hits: u64,
    pub live_entries: usize,
    pub top: Vec<(String, i64)>,
}

pub struct CacheStore {
    pool: SqlitePool,
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl CacheStore {
    pub fn new(pool: SqlitePool, default_ttl_secs: u64) -> CacheStore {
        CacheStore {
            pool,
            default_ttl: Duration::from_secs(default_ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the entry for `id`, serializing the payload with a
    /// captured timestamp. Seeds the hit counter at zero; population is not
    /// an access.
    pub async fn put<T: Serialize>(
        &self,
        id: &str,
        content: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = envelope(content);

        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.write().await.insert(
            id.to_string(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );

        sqlx::query(
            "INSERT INTO access_stats (document_id, hits) VALUES (?, 0) ON CONFLICT(document_id) DO NOTHING",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a live entry. A hit increments the durable counter and returns
    /// the serialized payload; expiry and absence are both a miss.
    pub async fn get(&self, id: &str) -> Result<Option<String>> {
        let payload = {
            let entries = self.entries.read().await;
            match entries.get(id) {
                Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
                Some(_) => None,
                None => return Ok(None),
            }
        };

        let Some(payload) = payload else {
            // Expired: drop the dead entry, keep the counter.
            self.entries.write().await.remove(id);
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO access_stats (document_id, hits) VALUES (?, 1)
            ON CONFLICT(document_id) DO UPDATE SET hits = hits + 1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Some(payload))
    }

    /// Explicit eviction, independent of TTL. Returns whether an entry was
    /// present.
    pub async fn invalidate(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Top ids by hit count, joined with their canonical document rows.
    pub async fn popular(&self, limit: usize) -> Result<Vec<PopularEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT s.document_id, s.hits, d.title, d.locator, d.state
            FROM access_stats s
            LEFT JOIN documents d ON d.id = s.document_id
            ORDER BY s.hits DESC, s.document_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PopularEntry {
                document_id: row.get("document_id"),
                hits: row.get("hits"),
                title: row.get("title"),
                locator: row.get("locator"),
                state: row.get("state"),
            })
            .collect())
    }

    /// Re-prime the cache for the most popular documents by re-fetching their
    /// content. Cold-start mitigation, not required for correctness: per-item
    /// failures are logged and skipped. Returns how many entries were warmed.
    pub async fn warmup(&self, fetcher: &Fetcher, limit: usize) -> Result<u64> {
        let mut warmed = 0u64;
        for entry in self.popular(limit).await? {
            let Some(locator_raw) = entry.locator.as_deref() else {
                continue;
            };
            let locator = crate::models::Locator::parse(locator_raw);
            match fetcher.download(&locator).await {
                Ok(file) => {
                    let snapshot = DocumentSnapshot {
                        document_id: entry.document_id.clone(),
                        title: entry.title.clone(),
                        locator: locator_raw.to_string(),
                        content_type: file.content_type,
                        state: entry.state.clone().unwrap_or_default(),
                        size: Some(file.bytes.len() as u64),
                    };
                    self.put(&entry.document_id, &snapshot, None).await?;
                    warmed += 1;
                }
                Err(e) => {
                    tracing::warn!(document_id = %entry.document_id, "warmup fetch failed: {}", e);
                }
            }
        }
        Ok(warmed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS tracked, COALESCE(SUM(hits), 0) AS total_hits FROM access_stats",
        )
        .fetch_one(&self.pool)
        .await?;
        let tracked: i64 = row.get("tracked");
        let total_hits: i64 = row.get("total_hits");

        let top = self
            .popular(5)
            .await?
            .into_iter()
            .map(|e| (e.document_id, e.hits))
            .collect();

        Ok(CacheStats {
            tracked: tracked as u64,
            total_hits: total_hits as u64,
            live_entries: self.entries.read().await.len(),
            top,
        })
    }

    /// Drop all live entries. Hit counters are durable and survive.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn live_entries(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn hits(&self, id: &str) -> Result<i64> {
        let hits: Option<i64> =
            sqlx::query_scalar("SELECT hits FROM access_stats WHERE document_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hits.unwrap_or(0))
    }
}

/// Serialized payload shape shared by cache population and the fallback path.
fn envelope<T: Serialize>(content: &T) -> String {
    serde_json::json!({
        "content": content,
        "cached_at": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

/// The cached access layer: resolve a document's availability snapshot
/// through the cache, falling back to the durable store on a miss and
/// re-priming the entry. Returns the payload and whether it was a cache hit.
pub async fn fetch_snapshot(
    pool: &SqlitePool,
    cache: &CacheStore,
    document_id: &str,
) -> Result<Option<(String, bool)>> {
    if let Some(payload) = cache.get(document_id).await? {
        return Ok(Some((payload, true)));
    }

    let Some(doc) = crate::lifecycle::load(pool, document_id).await? else {
        return Ok(None);
    };
    let snapshot = DocumentSnapshot {
        document_id: doc.id.clone(),
        title: doc.title.clone(),
        locator: doc.locator.clone(),
        content_type: doc.content_type.clone(),
        state: doc.state.as_str().to_string(),
        size: doc.text_length.map(|n| n as u64),
    };
    cache.put(&doc.id, &snapshot, None).await?;
    Ok(Some((envelope(&snapshot), false)))
}
