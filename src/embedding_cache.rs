use crate::error::{EngineError, Result};
use crate::models::EmbeddingEntry;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// External embedding collaborator, called only on a cache miss.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier used for cache keying and model-wide invalidation.
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Versioned text→vector cache. Each (model, cluster) key carries a content
/// hash; embeddings are recomputed only when the hash moves, and replacement
/// is a single transaction so readers never observe a mix of two content
/// versions.
pub struct EmbeddingCache {
    db_path: PathBuf,
    /// At-most-one-writer discipline per (model, cluster); writers for
    /// different keys do not contend. Entries are removed once the last
    /// writer for a key releases, so the map never outgrows the set of keys
    /// currently in flight.
    write_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl EmbeddingCache {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn key_lock(&self, model: &str, cluster: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((model.to_string(), cluster.to_string()))
            .or_default()
            .clone()
    }

    /// Drop the map entry for a key once no other writer holds its lock.
    /// The map mutex is held during the count check, and cloning a key lock
    /// also requires the map mutex, so the count cannot move underneath.
    fn release_key_lock(&self, model: &str, cluster: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Two strong references: the map's and ours.
        if Arc::strong_count(lock) == 2 {
            locks.remove(&(model.to_string(), cluster.to_string()));
        }
    }

    /// Return the cluster's embeddings, computing them through `embedder`
    /// only when `content_hash` differs from the stored version. On a miss
    /// the old rows and version are replaced atomically; a failed embed call
    /// leaves the cache untouched.
    pub async fn get_or_compute(
        &self,
        model_name: &str,
        cluster_name: &str,
        content_hash: &str,
        texts: &[String],
        embedder: &dyn Embedder,
    ) -> Result<Vec<Vec<f32>>> {
        let lock = self.key_lock(model_name, cluster_name);
        let guard = lock.lock().await;
        let result = self
            .refresh(model_name, cluster_name, content_hash, texts, embedder)
            .await;
        drop(guard);
        self.release_key_lock(model_name, cluster_name, &lock);
        result
    }

    async fn refresh(
        &self,
        model_name: &str,
        cluster_name: &str,
        content_hash: &str,
        texts: &[String],
        embedder: &dyn Embedder,
    ) -> Result<Vec<Vec<f32>>> {
        if self.stored_version(model_name, cluster_name)?.as_deref() == Some(content_hash) {
            let mut by_text: HashMap<String, Vec<f32>> = self
                .entries(model_name, cluster_name)?
                .into_iter()
                .map(|e| (e.value_text, e.embedding))
                .collect();
            let cached: Option<Vec<Vec<f32>>> =
                texts.iter().map(|t| by_text.remove(t)).collect();
            if let Some(embeddings) = cached {
                log::debug!(
                    "embedding cache hit for ({}, {}), {} row(s)",
                    model_name,
                    cluster_name,
                    embeddings.len()
                );
                return Ok(embeddings);
            }
            // Version matched but a requested text is missing: treat the
            // cluster as stale and recompute.
            log::warn!(
                "embedding cache for ({}, {}) is missing rows despite matching version",
                model_name,
                cluster_name
            );
        }

        let embeddings = embedder
            .embed(texts)
            .await
            .map_err(|e| EngineError::EmbeddingComputeFailure(e.to_string()))?;
        if embeddings.len() != texts.len() {
            return Err(EngineError::EmbeddingComputeFailure(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM embeddings WHERE model_name = ? AND cluster_name = ?",
            params![model_name, cluster_name],
        )?;
        for (text, embedding) in texts.iter().zip(&embeddings) {
            tx.execute(
                "INSERT INTO embeddings (model_name, cluster_name, value_text, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![model_name, cluster_name, text, embedding_to_bytes(embedding), now],
            )?;
        }
        // Delete-then-insert, never update-in-place: a version row always
        // describes a fully written cluster.
        tx.execute(
            "DELETE FROM embedding_versions WHERE model_name = ? AND cluster_name = ?",
            params![model_name, cluster_name],
        )?;
        tx.execute(
            "INSERT INTO embedding_versions (model_name, cluster_name, version, updated_at)
             VALUES (?, ?, ?, ?)",
            params![model_name, cluster_name, content_hash, now],
        )?;
        tx.commit()?;

        log::info!(
            "recomputed {} embedding(s) for ({}, {})",
            embeddings.len(),
            model_name,
            cluster_name
        );
        Ok(embeddings)
    }

    pub fn stored_version(&self, model_name: &str, cluster_name: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        let version = conn
            .query_row(
                "SELECT version FROM embedding_versions WHERE model_name = ? AND cluster_name = ?",
                params![model_name, cluster_name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(version)
    }

    pub fn entries(&self, model_name: &str, cluster_name: &str) -> Result<Vec<EmbeddingEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT value_text, embedding, created_at FROM embeddings
             WHERE model_name = ? AND cluster_name = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![model_name, cluster_name], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok(EmbeddingEntry {
                    model_name: model_name.to_string(),
                    cluster_name: cluster_name.to_string(),
                    value_text: row.get(0)?,
                    embedding: bytes_to_embedding(&blob),
                    created_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn has_embeddings_for_model(&self, model_name: &str) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model_name = ?",
            params![model_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Full invalidation when a model is retired.
    pub fn clear_embeddings_for_model(&self, model_name: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM embeddings WHERE model_name = ?",
            params![model_name],
        )?;
        tx.execute(
            "DELETE FROM embedding_versions WHERE model_name = ?",
            params![model_name],
        )?;
        tx.commit()?;
        log::info!("cleared {} embedding(s) for model {}", deleted, model_name);
        Ok(())
    }
}

fn ignore_no_rows<T>(e: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

/// Serialize an embedding as little-endian f32 bytes.
pub fn embedding_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian f32 bytes back into an embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors; zero when shapes differ or either
/// vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting-stub"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("embedding backend down");
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
    }

    fn cache() -> (tempfile::TempDir, EmbeddingCache) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("cache.db");
        db::init_database(&db_path).unwrap();
        (dir, EmbeddingCache::new(db_path))
    }

    fn texts(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_round_trip_computes_once() {
        let (_dir, cache) = cache();
        let embedder = CountingEmbedder::new();
        let input = texts(&["alpha", "beta"]);

        let first = cache
            .get_or_compute("m1", "clusters", "hash-1", &input, &embedder)
            .await
            .unwrap();
        let second = cache
            .get_or_compute("m1", "clusters", "hash-1", &input, &embedder)
            .await
            .unwrap();

        assert_eq!(embedder.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_version_change_replaces_rows() {
        let (_dir, cache) = cache();
        let embedder = CountingEmbedder::new();

        cache
            .get_or_compute("m1", "c", "v1", &texts(&["old text"]), &embedder)
            .await
            .unwrap();
        cache
            .get_or_compute("m1", "c", "v2", &texts(&["new text"]), &embedder)
            .await
            .unwrap();

        assert_eq!(embedder.calls(), 2);
        assert_eq!(cache.stored_version("m1", "c").unwrap().as_deref(), Some("v2"));

        // Never a mix of two content versions.
        let entries = cache.entries("m1", "c").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value_text, "new text");
    }

    #[tokio::test]
    async fn test_failed_embed_leaves_cache_untouched() {
        let (_dir, cache) = cache();
        let good = CountingEmbedder::new();
        cache
            .get_or_compute("m1", "c", "v1", &texts(&["kept"]), &good)
            .await
            .unwrap();

        let bad = CountingEmbedder::failing();
        let err = cache
            .get_or_compute("m1", "c", "v2", &texts(&["lost"]), &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingComputeFailure(_)));

        assert_eq!(cache.stored_version("m1", "c").unwrap().as_deref(), Some("v1"));
        let entries = cache.entries("m1", "c").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value_text, "kept");
    }

    #[tokio::test]
    async fn test_model_invalidation() {
        let (_dir, cache) = cache();
        let embedder = CountingEmbedder::new();
        cache
            .get_or_compute("retired", "c", "v", &texts(&["x"]), &embedder)
            .await
            .unwrap();
        cache
            .get_or_compute("current", "c", "v", &texts(&["y"]), &embedder)
            .await
            .unwrap();

        assert!(cache.has_embeddings_for_model("retired").unwrap());
        cache.clear_embeddings_for_model("retired").unwrap();
        assert!(!cache.has_embeddings_for_model("retired").unwrap());
        assert!(cache.stored_version("retired", "c").unwrap().is_none());

        // Other models are untouched.
        assert!(cache.has_embeddings_for_model("current").unwrap());
    }

    #[tokio::test]
    async fn test_key_locks_released_after_use() {
        let (_dir, cache) = cache();
        let embedder = CountingEmbedder::new();

        cache
            .get_or_compute("m1", "c1", "v", &texts(&["x"]), &embedder)
            .await
            .unwrap();
        cache
            .get_or_compute("m2", "c2", "v", &texts(&["y"]), &embedder)
            .await
            .unwrap();

        let locks = cache.write_locks.lock().unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn test_embedding_byte_round_trip() {
        let original = vec![1.0f32, -2.5, 0.0, 42.25];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes_to_embedding(&bytes), original);
        assert!(bytes_to_embedding(&[]).is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0, 0.0]), 0.0);
    }
}
