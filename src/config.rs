use serde::{Deserialize, Serialize};

/// How keyword operations produced by the quoted-query fast path should be
/// interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Keep the literal quotes around the phrase so ranking treats it as an
    /// exact-phrase match.
    Exact,
    /// Strip the quotes and let the phrase participate in relevance ranking
    /// like any other keyword.
    Relevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum pairwise distance (in term positions) for two terms to count
    /// as proximate.
    pub proximity_threshold: usize,

    /// Interpretation of quoted phrases in queries.
    pub match_mode: MatchMode,

    /// Default page size for paginated results.
    pub page_size: usize,

    /// Minimum cosine similarity for a similarity-tier cache hit.
    pub similarity_threshold: f32,

    /// Row cap per LLM cache table; oldest `last_accessed` rows are evicted
    /// when an insert would exceed it. Zero disables the cap.
    pub llm_cache_capacity: usize,

    /// Marker wrapped around highlighted spans in rendered excerpts.
    pub highlight_marker: String,

    /// Documents scanned between cooperative yields during ranking.
    pub rank_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 10,
            match_mode: MatchMode::Relevant,
            page_size: 10,
            similarity_threshold: 0.85,
            llm_cache_capacity: 1000,
            highlight_marker: "**".to_string(),
            rank_chunk_size: 64,
        }
    }
}
