use crate::config::MatchMode;
use crate::error::{EngineError, Result};
use crate::models::{PropertyFilter, SearchOperation, SearchQueryExtraction};
use async_trait::async_trait;
use serde::Deserialize;

/// External LLM collaborator. The core never assumes a specific model, only
/// that the returned text is JSON matching the operation schema.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_structured_response(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> anyhow::Result<String>;
}

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You convert a user's natural-language note-search request into JSON. \
Respond with a single JSON object: {\"operations\": [{\"keywords\": [..], \
\"filenames\": [..], \"folders\": [..], \"properties\": [{\"name\": .., \
\"value\": ..}]}], \"explanation\": \"..\", \"confidence\": 0.0-1.0}. \
Operations are alternatives; fields inside one operation must all hold. \
Omit fields you do not need. Output JSON only, no prose.";

/// Shape the LLM must produce. Unknown fields are ignored; missing optional
/// fields get defaults. Anything that fails to parse is a validation error.
#[derive(Debug, Deserialize)]
struct LlmExtraction {
    operations: Vec<SearchOperation>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parses raw user text into a structured multi-operation search plan,
/// falling back to the LLM collaborator only when no deterministic rule
/// matches.
pub struct QueryExtractor<L: LlmClient + ?Sized> {
    llm: std::sync::Arc<L>,
    match_mode: MatchMode,
}

impl<L: LlmClient + ?Sized> QueryExtractor<L> {
    pub fn new(llm: std::sync::Arc<L>, match_mode: MatchMode) -> Self {
        Self { llm, match_mode }
    }

    /// Never fails on merely unusual input; only contract violations
    /// (unreachable LLM, invalid LLM JSON) surface as errors.
    pub async fn extract(
        &self,
        raw_query: &str,
        lang_hint: Option<&str>,
    ) -> Result<SearchQueryExtraction> {
        let lang = normalize_lang(lang_hint);

        if let Some(phrase) = get_quoted_query(raw_query) {
            return Ok(self.quoted_extraction(&phrase, lang));
        }

        if let Some(tags) = parse_tag_only_query(raw_query) {
            let operations = vec![SearchOperation {
                properties: tags
                    .into_iter()
                    .map(|value| PropertyFilter {
                        name: "tag".to_string(),
                        value,
                    })
                    .collect(),
                ..Default::default()
            }];
            return Ok(SearchQueryExtraction {
                operations,
                explanation: "tag filter".to_string(),
                lang,
                confidence: 1.0,
                needs_llm: false,
            });
        }

        self.llm_extraction(raw_query, lang).await
    }

    /// Two alternative operations: exact filename match or exact-phrase
    /// keyword match. In exact mode the keyword keeps literal quotes so the
    /// ranker applies the phrase bonus.
    fn quoted_extraction(&self, phrase: &str, lang: String) -> SearchQueryExtraction {
        let keyword = match self.match_mode {
            MatchMode::Exact => format!("\"{}\"", phrase),
            MatchMode::Relevant => phrase.to_string(),
        };
        SearchQueryExtraction {
            operations: vec![
                SearchOperation {
                    filenames: vec![phrase.to_string()],
                    ..Default::default()
                },
                SearchOperation {
                    keywords: vec![keyword],
                    ..Default::default()
                },
            ],
            explanation: "quoted phrase".to_string(),
            lang,
            confidence: 1.0,
            needs_llm: false,
        }
    }

    async fn llm_extraction(&self, raw_query: &str, lang: String) -> Result<SearchQueryExtraction> {
        let response = self
            .llm
            .generate_structured_response(EXTRACTION_SYSTEM_PROMPT, raw_query)
            .await
            .map_err(|e| EngineError::LlmUnavailable(e.to_string()))?;

        let parsed = validate_llm_response(&response)?;

        log::debug!(
            "LLM extraction produced {} operation(s) for query: {}",
            parsed.operations.len(),
            raw_query
        );

        Ok(SearchQueryExtraction {
            operations: parsed.operations,
            explanation: parsed.explanation,
            lang,
            confidence: parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            needs_llm: true,
        })
    }
}

/// Shape check without keeping the parse result, for callers that must not
/// persist an invalid response.
pub(crate) fn validate_response_shape(response: &str) -> Result<()> {
    validate_llm_response(response).map(|_| ())
}

/// Validate raw LLM output against the operation schema. Strips a Markdown
/// code fence if the model wrapped its JSON in one.
fn validate_llm_response(response: &str) -> Result<LlmExtraction> {
    let body = strip_code_fence(response.trim());

    let parsed: LlmExtraction = serde_json::from_str(body)
        .map_err(|e| EngineError::InvalidLlmResponse(e.to_string()))?;

    if parsed.operations.is_empty() {
        return Err(EngineError::InvalidLlmResponse(
            "no operations in response".to_string(),
        ));
    }
    if parsed.operations.iter().any(SearchOperation::is_empty) {
        return Err(EngineError::InvalidLlmResponse(
            "operation with no fields".to_string(),
        ));
    }

    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn normalize_lang(hint: Option<&str>) -> String {
    match hint.map(|h| h.trim().to_lowercase()) {
        Some(h) if !h.is_empty() => h,
        _ => "en".to_string(),
    }
}

/// Extract the inner content of a fully quoted query. Supports `"` and `'`
/// with backslash-escaped inner quotes; empty inner content is rejected.
pub fn get_quoted_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let quote = chars.next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    if trimmed.len() < 2 || !trimmed.ends_with(quote) {
        return None;
    }

    let inner = &trimmed[quote.len_utf8()..trimmed.len() - quote.len_utf8()];
    if inner.is_empty() {
        return None;
    }

    // Walk the inner content: an unescaped closing quote means the query is
    // not a single quoted string ("a" b "c" must not collapse to a b c).
    let mut unescaped = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            if c != quote && c != '\\' {
                unescaped.push('\\');
            }
            unescaped.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return None;
        } else {
            unescaped.push(c);
        }
    }
    if escaped {
        // Trailing backslash escaped the closing quote.
        return None;
    }

    Some(unescaped)
}

/// Return the tag values (symbol stripped, order preserved, duplicates kept)
/// if the entire query is a comma/space-separated list of `#tag` tokens.
pub fn parse_tag_only_query(raw: &str) -> Option<Vec<String>> {
    let tokens: Vec<&str> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut tags = Vec::with_capacity(tokens.len());
    for token in tokens {
        let value = token.strip_prefix('#')?;
        if value.is_empty() {
            return None;
        }
        tags.push(value.to_string());
    }
    Some(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl StubLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate_structured_response(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn extractor(llm: StubLlm, mode: MatchMode) -> QueryExtractor<StubLlm> {
        QueryExtractor::new(Arc::new(llm), mode)
    }

    #[test]
    fn test_get_quoted_query() {
        assert_eq!(
            get_quoted_query("\"hello world\""),
            Some("hello world".to_string())
        );
        assert_eq!(
            get_quoted_query("'meeting minutes'"),
            Some("meeting minutes".to_string())
        );
        assert_eq!(get_quoted_query("hello"), None);
        assert_eq!(get_quoted_query("\"\""), None);
        assert_eq!(get_quoted_query("\"a\" b \"c\""), None);
        assert_eq!(get_quoted_query("\"mismatched'"), None);
    }

    #[test]
    fn test_get_quoted_query_escaped_inner() {
        assert_eq!(
            get_quoted_query(r#""say \"hi\" twice""#),
            Some(r#"say "hi" twice"#.to_string())
        );
        // A backslash that escapes the closing quote leaves it unterminated.
        assert_eq!(get_quoted_query(r#""oops\""#), None);
    }

    #[tokio::test]
    async fn test_quoted_query_two_operations() {
        let ex = extractor(StubLlm::new("{}"), MatchMode::Relevant);
        let extraction = ex.extract("\"project notes\"", None).await.unwrap();

        assert_eq!(extraction.confidence, 1.0);
        assert!(!extraction.needs_llm);
        assert_eq!(extraction.operations.len(), 2);
        assert_eq!(extraction.operations[0].filenames, vec!["project notes"]);
        assert_eq!(extraction.operations[1].keywords, vec!["project notes"]);
    }

    #[tokio::test]
    async fn test_quoted_query_exact_mode_keeps_quotes() {
        let ex = extractor(StubLlm::new("{}"), MatchMode::Exact);
        let extraction = ex.extract("'meeting minutes'", None).await.unwrap();
        assert_eq!(extraction.operations[1].keywords, vec!["\"meeting minutes\""]);
    }

    #[tokio::test]
    async fn test_tag_only_query() {
        let ex = extractor(StubLlm::new("{}"), MatchMode::Relevant);
        let extraction = ex.extract("#a, #b #c #b", None).await.unwrap();

        assert!(!extraction.needs_llm);
        assert_eq!(extraction.confidence, 1.0);
        assert_eq!(extraction.operations.len(), 1);
        let values: Vec<&str> = extraction.operations[0]
            .properties
            .iter()
            .map(|p| p.value.as_str())
            .collect();
        assert_eq!(values, vec!["a", "b", "c", "b"]);
        assert!(extraction.operations[0]
            .properties
            .iter()
            .all(|p| p.name == "tag"));
    }

    #[test]
    fn test_tag_only_rejects_mixed_input() {
        assert!(parse_tag_only_query("#a plus words").is_none());
        assert!(parse_tag_only_query("").is_none());
        assert!(parse_tag_only_query("#").is_none());
    }

    #[tokio::test]
    async fn test_llm_fallback_validates_schema() {
        let ex = extractor(
            StubLlm::new(
                r#"{"operations": [{"keywords": ["quarterly report"]}],
                    "explanation": "keyword search", "confidence": 0.9}"#,
            ),
            MatchMode::Relevant,
        );
        let extraction = ex.extract("find the quarterly report", None).await.unwrap();

        assert!(extraction.needs_llm);
        assert_eq!(extraction.confidence, 0.9);
        assert_eq!(extraction.operations[0].keywords, vec!["quarterly report"]);
    }

    #[tokio::test]
    async fn test_llm_fallback_strips_code_fence() {
        let ex = extractor(
            StubLlm::new("```json\n{\"operations\": [{\"keywords\": [\"x\"]}]}\n```"),
            MatchMode::Relevant,
        );
        let extraction = ex.extract("anything at all", None).await.unwrap();
        assert_eq!(extraction.operations[0].keywords, vec!["x"]);
    }

    #[tokio::test]
    async fn test_invalid_llm_response_is_fatal() {
        let ex = extractor(StubLlm::new("not json"), MatchMode::Relevant);
        let err = ex.extract("fuzzy request", None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidLlmResponse(_)));

        let ex = extractor(StubLlm::new(r#"{"operations": []}"#), MatchMode::Relevant);
        let err = ex.extract("fuzzy request", None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidLlmResponse(_)));
    }

    #[tokio::test]
    async fn test_lang_hint() {
        let ex = extractor(StubLlm::new("{}"), MatchMode::Relevant);
        let extraction = ex.extract("\"hola\"", Some("  ES ")).await.unwrap();
        assert_eq!(extraction.lang, "es");

        let extraction = ex.extract("\"hola\"", Some("   ")).await.unwrap();
        assert_eq!(extraction.lang, "en");
    }
}
