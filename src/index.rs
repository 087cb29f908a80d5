use crate::corpus::{CorpusChange, CorpusProvider};
use crate::error::{EngineError, Result};
use crate::markdown;
use crate::models::IndexedDocument;
use crate::tokenizer;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Immutable view of the index. One snapshot serves an entire query, so
/// ranking and highlighting see a single consistent corpus state; mutations
/// that land mid-query become visible on the next snapshot only (eventual,
/// not serializable, consistency).
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    documents: HashMap<i64, IndexedDocument>,
    by_path: HashMap<String, i64>,
    /// stem -> document id -> sorted term positions
    postings: HashMap<String, HashMap<i64, Vec<usize>>>,
}

impl IndexSnapshot {
    pub fn documents(&self) -> impl Iterator<Item = &IndexedDocument> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document(&self, id: i64) -> Option<&IndexedDocument> {
        self.documents.get(&id)
    }

    pub fn document_by_path(&self, path: &str) -> Option<&IndexedDocument> {
        self.by_path.get(path).and_then(|id| self.documents.get(id))
    }

    pub fn postings_for(&self, stem: &str) -> Option<&HashMap<i64, Vec<usize>>> {
        self.postings.get(stem)
    }

    pub fn positions(&self, doc_id: i64, stem: &str) -> Option<&Vec<usize>> {
        self.postings.get(stem).and_then(|m| m.get(&doc_id))
    }

    pub fn occurrences(&self, doc_id: i64, stem: &str) -> usize {
        self.positions(doc_id, stem).map(|p| p.len()).unwrap_or(0)
    }

    /// Position lists for a set of stems in one document, keyed by stem —
    /// the shape the proximity matcher consumes.
    pub fn term_positions(&self, doc_id: i64, stems: &[String]) -> HashMap<String, Vec<usize>> {
        let mut out = HashMap::new();
        for stem in stems {
            if let Some(positions) = self.positions(doc_id, stem) {
                out.insert(stem.clone(), positions.clone());
            }
        }
        out
    }
}

/// The index exclusively owns its `IndexedDocument` records: they are created
/// on build or file change and removed on deletion. Consumers only ever see
/// snapshots.
#[derive(Debug)]
pub struct NoteIndex {
    state: IndexSnapshot,
    /// path -> content hash, for skipping unchanged files on change events.
    hashes: HashMap<String, String>,
    /// doc id -> stems it contributed, so removal never scans the whole
    /// posting table.
    doc_stems: HashMap<i64, Vec<String>>,
    next_id: i64,
}

impl NoteIndex {
    pub fn new() -> Self {
        Self {
            state: IndexSnapshot::default(),
            hashes: HashMap::new(),
            doc_stems: HashMap::new(),
            next_id: 1,
        }
    }

    /// Index every document the corpus lists under `folder`. An unreachable
    /// corpus aborts the build; no partially usable index is returned.
    pub async fn build<C: CorpusProvider + ?Sized>(corpus: &C, folder: &str) -> Result<Self> {
        let mut index = Self::new();
        let paths = corpus
            .list_documents(folder)
            .await
            .map_err(|e| EngineError::IndexUnavailable(e.to_string()))?;

        for path in paths {
            let content = corpus
                .read_document(&path)
                .await
                .map_err(|e| EngineError::IndexUnavailable(e.to_string()))?;
            let mtime = corpus.last_modified(&path).await.unwrap_or(0);
            index.upsert(&path, &content, mtime);
        }

        log::info!("indexed {} document(s) from folder '{}'", index.state.len(), folder);
        Ok(index)
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::new(self.state.clone())
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Add or re-index one document. Returns false when the content hash is
    /// unchanged and nothing was done.
    pub fn upsert(&mut self, path: &str, content: &str, last_modified: i64) -> bool {
        let hash = content_hash(content);
        if self.hashes.get(path) == Some(&hash) {
            log::debug!("document unchanged, skipping: {}", path);
            return false;
        }
        self.remove(path);

        let id = self.next_id;
        self.next_id += 1;

        let mut tags = BTreeSet::new();
        let mut stems_seen: Vec<String> = Vec::new();
        let mut token_count = 0usize;
        let mut position = 0usize;

        for segment in markdown::extract_indexable_text(content) {
            for token in tokenizer::tokenize(&segment.text) {
                if let Some(tag) = token.raw.strip_prefix('#') {
                    tags.insert(tag.to_lowercase());
                }
                let per_doc = self
                    .state
                    .postings
                    .entry(token.stem.clone())
                    .or_default()
                    .entry(id)
                    .or_default();
                if per_doc.is_empty() {
                    stems_seen.push(token.stem.clone());
                }
                per_doc.push(position);
                position += 1;
                token_count += 1;
            }
        }

        let document = IndexedDocument {
            id,
            path: path.to_string(),
            file_name: file_name_of(path),
            last_modified,
            tags,
            token_count,
        };

        self.state.by_path.insert(path.to_string(), id);
        self.state.documents.insert(id, document);
        self.doc_stems.insert(id, stems_seen);
        self.hashes.insert(path.to_string(), hash);
        true
    }

    /// Drop a document and all its postings. No-op for unknown paths.
    pub fn remove(&mut self, path: &str) {
        let Some(id) = self.state.by_path.remove(path) else {
            return;
        };
        self.state.documents.remove(&id);
        self.hashes.remove(path);

        for stem in self.doc_stems.remove(&id).unwrap_or_default() {
            if let Some(per_doc) = self.state.postings.get_mut(&stem) {
                per_doc.remove(&id);
                if per_doc.is_empty() {
                    self.state.postings.remove(&stem);
                }
            }
        }
    }

    /// Consume one corpus change notification. Read failures on a created or
    /// modified file surface as `IndexUnavailable`; the previous index state
    /// is kept.
    pub async fn apply_change<C: CorpusProvider + ?Sized>(
        &mut self,
        corpus: &C,
        change: CorpusChange,
    ) -> Result<()> {
        match change {
            CorpusChange::Created(path) | CorpusChange::Modified(path) => {
                let content = corpus
                    .read_document(&path)
                    .await
                    .map_err(|e| EngineError::IndexUnavailable(e.to_string()))?;
                let mtime = corpus.last_modified(&path).await.unwrap_or(0);
                if self.upsert(&path, &content, mtime) {
                    log::info!("re-indexed {}", path);
                }
            }
            CorpusChange::Deleted(path) => {
                self.remove(&path);
                log::info!("removed {} from index", path);
            }
        }
        Ok(())
    }
}

impl Default for NoteIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
