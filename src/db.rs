use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Initialize the cache database with all required tables.
pub fn init_database(db_path: &Path) -> Result<()> {
    let conn = Connection::open(db_path).context("Failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    create_schema(&conn)?;

    log::info!("Cache database initialized successfully");
    Ok(())
}

/// Create all cache tables.
fn create_schema(conn: &Connection) -> Result<()> {
    // Embedding rows, append-only per (model, cluster); superseded rows are
    // deleted in bulk, never updated in place.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_name TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            value_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // One live version row per (model, cluster), maintained by
    // delete-then-insert.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS embedding_versions (
            model_name TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            version TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(model_name, cluster_name)
        )",
        [],
    )?;

    // Exact-tier LLM response ledger.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS llm_cache_exact (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            response TEXT NOT NULL,
            command_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL,
            UNIQUE(query, command_type)
        )",
        [],
    )?;

    // Similarity-tier hits; these additionally carry the score that
    // justified reuse.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS llm_cache_similarity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            response TEXT NOT NULL,
            command_type TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_key
         ON embeddings(model_name, cluster_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_llm_exact_access
         ON llm_cache_exact(command_type, last_accessed)",
        [],
    )?;

    log::info!("Cache schema created successfully");
    Ok(())
}

/// Get a database connection.
pub fn get_connection(db_path: &Path) -> Result<Connection> {
    Connection::open(db_path).context("Failed to open database connection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        init_database(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = get_connection(&db_path).unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"embeddings".to_string()));
        assert!(tables.contains(&"embedding_versions".to_string()));
        assert!(tables.contains(&"llm_cache_exact".to_string()));
        assert!(tables.contains(&"llm_cache_similarity".to_string()));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        init_database(&db_path).unwrap();
        init_database(&db_path).unwrap();
    }
}
