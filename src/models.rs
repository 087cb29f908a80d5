use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A document owned by the index. Created on index build or file change,
/// removed on file deletion; never shared mutably across components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: i64,
    pub path: String,
    pub file_name: String,
    pub last_modified: i64,
    pub tags: BTreeSet<String>,
    pub token_count: usize,
}

/// One property filter inside a search operation, e.g. `{name: "tag", value: "project"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub name: String,
    pub value: String,
}

/// One alternative match strategy within a query. Fields are AND'd together;
/// multiple operations form an OR-set for the whole query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOperation {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

impl SearchOperation {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.filenames.is_empty()
            && self.folders.is_empty()
            && self.properties.is_empty()
    }
}

/// Structured search plan produced once per raw query; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryExtraction {
    pub operations: Vec<SearchOperation>,
    pub explanation: String,
    pub lang: String,
    /// In [0, 1]. Deterministic fast paths report 1.
    pub confidence: f32,
    pub needs_llm: bool,
}

/// One document that satisfied at least one operation. Ephemeral,
/// recomputed per query.
#[derive(Debug, Clone)]
pub struct ConditionResult {
    pub document: IndexedDocument,
    pub score: f32,
    pub keywords_matched: Vec<String>,
    /// Earliest term position that contributed to the match, used as the
    /// secondary ordering key for pagination stability.
    pub first_match_position: usize,
}

/// A slice view over ranked results. `condition_results.len() <= limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedSearchResult<T> {
    pub condition_results: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// One rendered excerpt region: the source line with matches wrapped in the
/// configured emphasis marker, plus character offsets relative to that line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcerptBlock {
    pub path: String,
    /// 1-based line number in the source document.
    pub line: usize,
    /// Character offset of the first highlighted span within the line.
    pub start: usize,
    /// Character offset one past the last highlighted span within the line.
    pub end: usize,
    pub rendered: String,
    /// Number of highlighted spans in this block; ordering key.
    pub span_count: usize,
}

/// One cached text→vector row. Append-only per (model, cluster); superseded
/// rows are deleted, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub model_name: String,
    pub cluster_name: String,
    pub value_text: String,
    pub embedding: Vec<f32>,
    pub created_at: i64,
}

/// The live content version for one (model, cluster). Exactly one row per
/// key, enforced by delete-then-insert on update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterVersionEntry {
    pub model_name: String,
    pub cluster_name: String,
    pub version: String,
    pub updated_at: i64,
}

/// Which cache tier produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMatchType {
    Exact,
    Similarity,
}

/// One recorded LLM exchange. Exact and similarity rows live in disjoint
/// tables; similarity rows additionally carry a score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCacheEntry {
    pub query: String,
    pub response: String,
    pub command_type: String,
    pub created_at: i64,
    pub last_accessed: i64,
    pub match_type: CacheMatchType,
    pub similarity_score: Option<f32>,
}
