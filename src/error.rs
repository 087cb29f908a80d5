use thiserror::Error;

/// Engine-level error taxonomy.
///
/// The proximity matcher and the highlighter never produce these; they
/// degrade to empty output on malformed input. The extractor and the caches
/// fail loudly so callers can show the user a precise message instead of a
/// silently empty result set.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed query supplied by the caller (bad quoting, invalid pattern).
    /// Surfaced, never retried internally.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The LLM collaborator returned JSON that does not validate against the
    /// search-operation schema. Fatal for the current query; retry policy
    /// belongs to the caller.
    #[error("LLM response failed validation: {0}")]
    InvalidLlmResponse(String),

    /// The LLM collaborator could not be reached at all. Distinct from a
    /// malformed response so callers can offer retry instead of rejecting
    /// the query.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// Embedding computation failed mid-flight. Cache state is left untouched.
    #[error("embedding computation failed: {0}")]
    EmbeddingComputeFailure(String),

    /// The corpus collaborator is unreachable; no partial ranking is returned.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
