//! URL canonicalization and "already known" testing.
//!
//! Every URL entering the engine is normalized once; the normalized form is
//! the dedup key. Existence checks batch store lookups and cache both
//! presence and absence in a process-wide TTL'd map. Store errors invalidate
//! the affected entries and propagate: an error means "unknown", never
//! "known".

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;

use crate::error::{EngineError, Result};
use crate::models::WorkItemType;
use crate::store::{collections, Store, Where};

/// Store lookups are chunked to at most this many URLs per query.
const BATCH_CHUNK: usize = 10;

/// Query parameters stripped during normalization.
const TRACKING_PARAMS: [&str; 4] = ["fbclid", "gclid", "ref", "source"];

/// Canonicalize a URL: lowercase scheme and host, strip default ports,
/// drop the fragment and tracking params, trim the trailing slash, and
/// sort the remaining query alphabetically. Idempotent.
pub fn normalize_url(raw: &str) -> Result<String> {
    let parsed =
        Url::parse(raw.trim()).map_err(|e| EngineError::Parse(format!("bad url {}: {}", raw, e)))?;

    let scheme = parsed.scheme().to_lowercase();
    let host = parsed
        .host_str()
        .ok_or_else(|| EngineError::Parse(format!("url has no host: {}", raw)))?
        .to_lowercase();

    let mut out = format!("{}://{}", scheme, host);
    if let Some(port) = parsed.port() {
        // Url::port() is None when the port matches the scheme default.
        out.push_str(&format!(":{}", port));
    }

    let path = parsed.path().trim_end_matches('/');
    out.push_str(path);

    let mut query: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !query.is_empty() {
        query.sort();
        let encoded: Vec<String> = query
            .into_iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        out.push('?');
        out.push_str(&encoded.join("&"));
    }

    Ok(out)
}

/// SHA-256 of the normalized URL, hex-encoded. Persisted alongside stored
/// records for O(1) equality lookup.
pub fn url_hash(url: &str) -> Result<String> {
    let normalized = normalize_url(url)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

struct CacheEntry {
    known: bool,
    inserted: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

/// Process-wide existence cache keyed by `(normalized url, type)`.
pub struct DedupCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10_000)
    }
}

impl DedupCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    fn cache_key(url: &str, item_type: WorkItemType) -> String {
        format!("{}|{}", item_type.as_str(), url)
    }

    async fn cached(&self, key: &str) -> Option<bool> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(key) {
            Some(entry) => {
                if entry.inserted.elapsed() < self.ttl {
                    return Some(entry.known);
                }
                true
            }
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    async fn insert(&self, key: String, known: bool) {
        let mut inner = self.inner.lock().await;
        while inner.entries.len() >= self.capacity {
            match inner.insertion_order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                known,
                inserted: Instant::now(),
            },
        );
        inner.insertion_order.push_back(key);
    }

    async fn invalidate(&self, keys: &[String]) {
        let mut inner = self.inner.lock().await;
        for key in keys {
            inner.entries.remove(key);
        }
    }

    /// Test which of the given URLs are already known, across the work
    /// queue (any status) and, for jobs, the persisted matches. URLs are
    /// normalized before lookup; the result is keyed by the caller's
    /// original strings.
    pub async fn batch_exists(
        &self,
        store: &dyn Store,
        urls: &[String],
        item_type: WorkItemType,
    ) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::new();
        let mut misses: Vec<(String, String)> = Vec::new(); // (original, normalized)

        for raw in urls {
            let normalized = normalize_url(raw)?;
            let key = Self::cache_key(&normalized, item_type);
            match self.cached(&key).await {
                Some(known) => {
                    result.insert(raw.clone(), known);
                }
                None => misses.push((raw.clone(), normalized)),
            }
        }

        for chunk in misses.chunks(BATCH_CHUNK) {
            let normalized: Vec<serde_json::Value> =
                chunk.iter().map(|(_, n)| json!(n)).collect();

            let queue_hit = store
                .query(
                    collections::WORK_QUEUE,
                    &[
                        Where::is_in("url", normalized.clone()),
                        Where::eq("type", item_type.as_str()),
                    ],
                    None,
                    None,
                )
                .await;

            let queue_docs = match queue_hit {
                Ok(docs) => docs,
                Err(e) => {
                    let keys: Vec<String> = chunk
                        .iter()
                        .map(|(_, n)| Self::cache_key(n, item_type))
                        .collect();
                    self.invalidate(&keys).await;
                    return Err(e);
                }
            };

            let mut known_urls: std::collections::HashSet<String> = queue_docs
                .iter()
                .filter_map(|d| d.get("url").and_then(|u| u.as_str()).map(String::from))
                .collect();

            // Jobs are also known once a match document exists.
            if item_type == WorkItemType::Job {
                let match_hit = store
                    .query(
                        collections::JOB_MATCHES,
                        &[Where::is_in("url", normalized)],
                        None,
                        None,
                    )
                    .await;
                match match_hit {
                    Ok(docs) => {
                        for doc in docs {
                            if let Some(u) = doc.get("url").and_then(|u| u.as_str()) {
                                known_urls.insert(u.to_string());
                            }
                        }
                    }
                    Err(e) => {
                        let keys: Vec<String> = chunk
                            .iter()
                            .map(|(_, n)| Self::cache_key(n, item_type))
                            .collect();
                        self.invalidate(&keys).await;
                        return Err(e);
                    }
                }
            }

            for (raw, normalized) in chunk {
                let known = known_urls.contains(normalized);
                self.insert(Self::cache_key(normalized, item_type), known)
                    .await;
                result.insert(raw.clone(), known);
            }
        }

        Ok(result)
    }

    /// Record that a URL is now known (e.g. just enqueued), so later
    /// existence checks within the TTL see it without a store roundtrip.
    pub async fn mark_known(&self, url: &str, item_type: WorkItemType) -> Result<()> {
        let normalized = normalize_url(url)?;
        self.insert(Self::cache_key(&normalized, item_type), true)
            .await;
        Ok(())
    }
}
