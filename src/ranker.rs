use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::index::IndexSnapshot;
use crate::models::{ConditionResult, IndexedDocument, SearchOperation};
use crate::proximity;
use crate::tokenizer;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

const TF_WEIGHT: f32 = 1.0;
const PROXIMITY_WEIGHT: f32 = 1.0;
const PHRASE_BONUS: f32 = 1.0;
const FILENAME_EXACT_BONUS: f32 = 2.0;
const STRUCTURAL_MATCH_SCORE: f32 = 1.0;

/// Score one document set against a query plan. Operations are OR'd: a
/// document earns a result by satisfying any one of them; fields inside an
/// operation are AND'd. Yields cooperatively between document chunks so a
/// large corpus never monopolizes the scheduler.
///
/// Filename entries are regex patterns; a pattern that fails to compile
/// fails the whole query with an error naming it, before any document is
/// scanned.
pub async fn rank(
    operations: &[SearchOperation],
    snapshot: &IndexSnapshot,
    config: &EngineConfig,
) -> Result<Vec<ConditionResult>> {
    let prepared: Vec<PreparedOperation> = operations
        .iter()
        .map(PreparedOperation::new)
        .collect::<Result<_>>()?;

    let mut results = Vec::new();
    for (scanned, document) in snapshot.documents().enumerate() {
        if scanned > 0 && scanned % config.rank_chunk_size.max(1) == 0 {
            tokio::task::yield_now().await;
        }

        let mut best_score = 0.0f32;
        let mut matched_any = false;
        let mut keywords_matched: Vec<String> = Vec::new();
        let mut first_match = usize::MAX;

        for op in &prepared {
            let Some(outcome) = op.evaluate(document, snapshot, config) else {
                continue;
            };
            matched_any = true;
            if outcome.score > best_score {
                best_score = outcome.score;
            }
            for kw in outcome.keywords_matched {
                if !keywords_matched.contains(&kw) {
                    keywords_matched.push(kw);
                }
            }
            first_match = first_match.min(outcome.first_match_position);
        }

        if matched_any {
            results.push(ConditionResult {
                document: document.clone(),
                score: best_score,
                keywords_matched,
                first_match_position: if first_match == usize::MAX { 0 } else { first_match },
            });
        }
    }

    // Total order: score desc, earliest match, then path.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.first_match_position.cmp(&b.first_match_position))
            .then_with(|| a.document.path.cmp(&b.document.path))
    });

    log::debug!("ranked {} matching document(s)", results.len());
    Ok(results)
}

struct OperationOutcome {
    score: f32,
    keywords_matched: Vec<String>,
    first_match_position: usize,
}

/// One keyword entry, pre-tokenized. A quoted entry asks for the exact-phrase
/// bonus when its stems occur consecutively.
struct PreparedKeyword {
    raw: String,
    stems: Vec<String>,
    quoted: bool,
}

/// One filename entry: the literal (lowercased) for the exact check plus its
/// compiled pattern for everything else.
struct PreparedFilename {
    literal: String,
    pattern: Regex,
}

struct PreparedOperation {
    keywords: Vec<PreparedKeyword>,
    filenames: Vec<PreparedFilename>,
    folders: Vec<String>,
    tags: Vec<String>,
    other_properties: usize,
}

impl PreparedOperation {
    fn new(op: &SearchOperation) -> Result<Self> {
        let keywords = op
            .keywords
            .iter()
            .map(|raw| {
                let trimmed = raw.trim();
                let quoted = trimmed.len() >= 2
                    && (trimmed.starts_with('"') && trimmed.ends_with('"')
                        || trimmed.starts_with('\'') && trimmed.ends_with('\''));
                PreparedKeyword {
                    raw: raw.clone(),
                    stems: tokenizer::split_terms(trimmed)
                        .iter()
                        .map(|t| tokenizer::stem(t))
                        .collect(),
                    quoted,
                }
            })
            .filter(|k| !k.stems.is_empty())
            .collect();

        let mut tags = Vec::new();
        let mut other_properties = 0;
        for prop in &op.properties {
            if prop.name.eq_ignore_ascii_case("tag") {
                tags.push(prop.value.trim_start_matches('#').to_lowercase());
            } else {
                // Documents only carry tags; any other property can never
                // hold, which makes the whole operation unsatisfiable.
                other_properties += 1;
            }
        }

        let filenames = op
            .filenames
            .iter()
            .map(|raw| {
                let pattern = RegexBuilder::new(raw)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        EngineError::InvalidQuery(format!(
                            "invalid filename pattern '{}': {}",
                            raw, e
                        ))
                    })?;
                Ok(PreparedFilename {
                    literal: raw.to_lowercase(),
                    pattern,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            keywords,
            filenames,
            folders: op.folders.clone(),
            tags,
            other_properties,
        })
    }

    /// All fields must hold for the document; None means no match.
    fn evaluate(
        &self,
        document: &IndexedDocument,
        snapshot: &IndexSnapshot,
        config: &EngineConfig,
    ) -> Option<OperationOutcome> {
        if self.other_properties > 0 {
            return None;
        }

        if !self.folders.is_empty()
            && !self.folders.iter().any(|f| document.path.starts_with(f.as_str()))
        {
            return None;
        }

        if !self.tags.is_empty() && !self.tags.iter().all(|t| document.tags.contains(t)) {
            return None;
        }

        let mut score = 0.0f32;
        let file_name = document.file_name.to_lowercase();
        if !self.filenames.is_empty() {
            let exact = self.filenames.iter().any(|f| {
                file_name == f.literal
                    || file_name.strip_suffix(".md").unwrap_or(&file_name) == f.literal
            });
            let pattern = self
                .filenames
                .iter()
                .any(|f| f.pattern.is_match(&document.file_name));
            if exact {
                score += FILENAME_EXACT_BONUS;
            } else if pattern {
                score += STRUCTURAL_MATCH_SCORE;
            } else {
                return None;
            }
        }

        if !self.tags.is_empty() {
            score += STRUCTURAL_MATCH_SCORE * self.tags.len() as f32;
        }

        let mut keywords_matched = Vec::new();
        let mut first_match = usize::MAX;
        if !self.keywords.is_empty() {
            let mut all_stems: Vec<String> = Vec::new();
            for keyword in &self.keywords {
                for stem in &keyword.stems {
                    if snapshot.occurrences(document.id, stem) == 0 {
                        return None;
                    }
                    if !all_stems.contains(stem) {
                        all_stems.push(stem.clone());
                    }
                }
            }

            // Term-frequency weight over the distinct matched stems.
            let token_count = document.token_count.max(1) as f32;
            for stem in &all_stems {
                let occurrences = snapshot.occurrences(document.id, stem);
                score += TF_WEIGHT * occurrences as f32 / token_count;
                if let Some(positions) = snapshot.positions(document.id, stem) {
                    if let Some(&first) = positions.first() {
                        first_match = first_match.min(first);
                    }
                }
            }

            // Proximity bonus: closer chains score higher.
            let term_positions = snapshot.term_positions(document.id, &all_stems);
            let prox =
                proximity::terms_proximity(&term_positions, &all_stems, config.proximity_threshold);
            if prox.is_proximity {
                score += PROXIMITY_WEIGHT
                    * prox
                        .min_distances
                        .iter()
                        .map(|&d| 1.0 / (1.0 + d as f32))
                        .sum::<f32>();
            }

            for keyword in &self.keywords {
                if keyword.quoted && has_consecutive_run(snapshot, document.id, &keyword.stems) {
                    score += PHRASE_BONUS;
                }
                keywords_matched.push(keyword.raw.clone());
            }
        }

        // A match with no keyword evidence still needs a nonzero score so
        // structural-only operations rank above nothing at all.
        if score == 0.0 {
            score = STRUCTURAL_MATCH_SCORE;
        }

        Some(OperationOutcome {
            score,
            keywords_matched,
            first_match_position: if first_match == usize::MAX { 0 } else { first_match },
        })
    }
}

/// True when the stems occur as one consecutive position run in the document.
fn has_consecutive_run(snapshot: &IndexSnapshot, doc_id: i64, stems: &[String]) -> bool {
    if stems.is_empty() {
        return false;
    }
    let Some(first_positions) = snapshot.positions(doc_id, &stems[0]) else {
        return false;
    };
    let rest: Vec<HashSet<usize>> = stems[1..]
        .iter()
        .map(|s| {
            snapshot
                .positions(doc_id, s)
                .map(|p| p.iter().copied().collect())
                .unwrap_or_default()
        })
        .collect();

    'outer: for &start in first_positions {
        for (offset, positions) in rest.iter().enumerate() {
            if !positions.contains(&(start + offset + 1)) {
                continue 'outer;
            }
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NoteIndex;
    use crate::models::PropertyFilter;

    fn index_of(entries: &[(&str, &str)]) -> NoteIndex {
        let mut index = NoteIndex::new();
        for (path, content) in entries {
            index.upsert(path, content, 0);
        }
        index
    }

    fn keyword_op(keywords: &[&str]) -> SearchOperation {
        SearchOperation {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_keyword_rank_and_order() {
        let index = index_of(&[
            ("b/dense.md", "rust rust rust and more rust"),
            ("a/sparse.md", "one mention of rust in a long piece of text about gardens"),
            ("c/none.md", "nothing relevant at all"),
        ]);
        let snap = index.snapshot();
        let results = rank(&[keyword_op(&["rust"])], &snap, &EngineConfig::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.path, "b/dense.md");
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].keywords_matched, vec!["rust"]);
    }

    #[tokio::test]
    async fn test_operations_are_or_fields_are_and() {
        let index = index_of(&[
            ("notes/apples.md", "apples grow on trees"),
            ("notes/pears.md", "pears grow on trees"),
        ]);
        let snap = index.snapshot();

        // One operation wanting both words matches nothing...
        let both = keyword_op(&["apples pears"]);
        assert!(rank(&[both], &snap, &EngineConfig::default())
            .await
            .unwrap()
            .is_empty());

        // ...two alternative operations match both documents.
        let ops = vec![keyword_op(&["apples"]), keyword_op(&["pears"])];
        let results = rank(&ops, &snap, &EngineConfig::default()).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_proximity_bonus_ranks_closer_first() {
        let index = index_of(&[
            ("far.md", "coffee early, then a very long ramble that only much later on mentions a meeting"),
            ("near.md", "coffee meeting this morning"),
        ]);
        let snap = index.snapshot();
        let results = rank(
            &[keyword_op(&["coffee meeting"])],
            &snap,
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.path, "near.md");
    }

    #[tokio::test]
    async fn test_exact_phrase_bonus() {
        let index = index_of(&[
            ("split.md", "project deadline is tight, the notes say so"),
            ("phrase.md", "my project notes from today"),
        ]);
        let snap = index.snapshot();
        let results = rank(
            &[keyword_op(&["\"project notes\""])],
            &snap,
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(results[0].document.path, "phrase.md");
    }

    #[tokio::test]
    async fn test_filename_and_folder_operations() {
        let index = index_of(&[
            ("work/standup.md", "daily sync"),
            ("personal/standup-ideas.md", "improvised comedy"),
        ]);
        let snap = index.snapshot();

        let op = SearchOperation {
            filenames: vec!["standup".to_string()],
            folders: vec!["work/".to_string()],
            ..Default::default()
        };
        let results = rank(&[op], &snap, &EngineConfig::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.path, "work/standup.md");
        // Extension-stripped name counts as exact.
        assert_eq!(results[0].score, FILENAME_EXACT_BONUS);
    }

    #[tokio::test]
    async fn test_tag_property_operation() {
        let index = index_of(&[
            ("a.md", "meeting notes #work/planning"),
            ("b.md", "grocery list #errands"),
        ]);
        let snap = index.snapshot();

        let op = SearchOperation {
            properties: vec![PropertyFilter {
                name: "tag".to_string(),
                value: "work/planning".to_string(),
            }],
            ..Default::default()
        };
        let results = rank(&[op], &snap, &EngineConfig::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.path, "a.md");
    }

    #[tokio::test]
    async fn test_unknown_property_matches_nothing() {
        let index = index_of(&[("a.md", "anything")]);
        let snap = index.snapshot();
        let op = SearchOperation {
            properties: vec![PropertyFilter {
                name: "author".to_string(),
                value: "someone".to_string(),
            }],
            ..Default::default()
        };
        assert!(rank(&[op], &snap, &EngineConfig::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stemmed_lookup() {
        let index = index_of(&[("walk.md", "she walked home")]);
        let snap = index.snapshot();
        let results = rank(&[keyword_op(&["walking"])], &snap, &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_filename_regex_pattern() {
        let index = index_of(&[
            ("meeting-2024-01.md", "january sync"),
            ("meeting-2024-02.md", "february sync"),
            ("shopping.md", "eggs"),
        ]);
        let snap = index.snapshot();

        let op = SearchOperation {
            filenames: vec![r"meeting-\d{4}-\d{2}".to_string()],
            ..Default::default()
        };
        let results = rank(&[op], &snap, &EngineConfig::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document.path.starts_with("meeting")));
    }

    #[tokio::test]
    async fn test_invalid_filename_pattern_names_it() {
        let index = index_of(&[("a.md", "anything")]);
        let snap = index.snapshot();

        let op = SearchOperation {
            filenames: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        let err = rank(&[op], &snap, &EngineConfig::default())
            .await
            .unwrap_err();
        let crate::error::EngineError::InvalidQuery(message) = err else {
            panic!("expected InvalidQuery, got {:?}", err);
        };
        assert!(message.contains("[unclosed"));
    }

    #[tokio::test]
    async fn test_deterministic_tie_break_by_path() {
        let index = index_of(&[("z.md", "same words"), ("a.md", "same words")]);
        let snap = index.snapshot();
        let results = rank(&[keyword_op(&["same words"])], &snap, &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(results[0].document.path, "a.md");
        assert_eq!(results[1].document.path, "z.md");
    }
}
