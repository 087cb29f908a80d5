use crate::error::Result;
use crate::models::{CacheMatchType, LlmCacheEntry};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// One stored exchange offered to the caller for similarity scoring.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub query: String,
    pub response: String,
    pub score: f32,
}

/// Two-tier LLM response cache: literal-text match first, then the best
/// caller-scored embedding match above a threshold. A ledger rather than an
/// LRU, but bounded: inserts evict the oldest `last_accessed` rows past the
/// configured capacity.
pub struct LlmResponseCache {
    db_path: PathBuf,
    capacity: usize,
}

impl LlmResponseCache {
    /// `capacity` of zero disables the row cap.
    pub fn new(db_path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            db_path: db_path.into(),
            capacity,
        }
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Exact-tier lookup. A hit refreshes `last_accessed`.
    pub fn lookup(&self, query: &str, command_type: &str) -> Result<Option<LlmCacheEntry>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                "SELECT response, created_at, last_accessed FROM llm_cache_exact
                 WHERE query = ? AND command_type = ?",
                params![query, command_type],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((response, created_at, _)) = row else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE llm_cache_exact SET last_accessed = ?
             WHERE query = ? AND command_type = ?",
            params![now, query, command_type],
        )?;

        log::debug!("exact cache hit for command '{}'", command_type);
        Ok(Some(LlmCacheEntry {
            query: query.to_string(),
            response,
            command_type: command_type.to_string(),
            created_at,
            last_accessed: now,
            match_type: CacheMatchType::Exact,
            similarity_score: None,
        }))
    }

    /// All stored exchanges for one command type, for the caller to score
    /// through the embedding layer.
    pub fn candidates(&self, command_type: &str) -> Result<Vec<(String, String)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT query, response FROM llm_cache_exact
             WHERE command_type = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![command_type], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Similarity-tier resolution: take the caller's pre-scored candidates,
    /// return the highest one at or above `threshold`, and record the reuse
    /// in the similarity ledger with its score.
    pub fn best_similar(
        &self,
        query: &str,
        command_type: &str,
        scored: &[ScoredCandidate],
        threshold: f32,
    ) -> Result<Option<LlmCacheEntry>> {
        let best = scored
            .iter()
            .filter(|c| c.score >= threshold)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        let Some(best) = best else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO llm_cache_similarity
             (query, response, command_type, similarity_score, created_at, last_accessed)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![query, best.response, command_type, best.score as f64, now, now],
        )?;
        self.enforce_capacity(&conn, "llm_cache_similarity")?;

        log::debug!(
            "similarity cache hit for command '{}' (score {:.3}, source query '{}')",
            command_type,
            best.score,
            best.query
        );
        Ok(Some(LlmCacheEntry {
            query: query.to_string(),
            response: best.response.clone(),
            command_type: command_type.to_string(),
            created_at: now,
            last_accessed: now,
            match_type: CacheMatchType::Similarity,
            similarity_score: Some(best.score),
        }))
    }

    /// Record a resolved query. Every resolution is recorded, whether it was
    /// served from cache or freshly generated.
    pub fn record(&self, query: &str, response: &str, command_type: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO llm_cache_exact
             (query, response, command_type, created_at, last_accessed)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(query, command_type)
             DO UPDATE SET response = excluded.response, last_accessed = excluded.last_accessed",
            params![query, response, command_type, now, now],
        )?;
        self.enforce_capacity(&conn, "llm_cache_exact")?;
        Ok(())
    }

    pub fn len(&self, command_type: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM llm_cache_exact WHERE command_type = ?",
            params![command_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn enforce_capacity(&self, conn: &Connection, table: &str) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM {table} WHERE id IN (
                SELECT id FROM {table} ORDER BY last_accessed DESC, id DESC
                LIMIT -1 OFFSET ?
            )"
        );
        let evicted = conn.execute(&sql, params![self.capacity as i64])?;
        if evicted > 0 {
            log::debug!("evicted {} row(s) from {}", evicted, table);
        }
        Ok(())
    }
}
