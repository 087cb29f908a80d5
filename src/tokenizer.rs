use rust_stemmers::{Algorithm, Stemmer};
use std::sync::OnceLock;

/// One term produced by the tokenizer. `position` is the term-sequence index
/// (not a byte offset); byte offsets locate the term in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub raw: String,
    pub stem: String,
    pub position: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    /// 1-based source line.
    pub line: usize,
}

/// Classic English connector set, sorted for binary search.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in",
    "into", "is", "it", "no", "not", "of", "on", "or", "s", "such", "t",
    "that", "the", "their", "then", "there", "these", "they", "this", "to",
    "was", "will", "with",
];

fn stemmer() -> &'static Stemmer {
    static STEMMER: OnceLock<Stemmer> = OnceLock::new();
    STEMMER.get_or_init(|| Stemmer::create(Algorithm::English))
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word.to_lowercase().as_str()).is_ok()
}

/// Normalize a word to its stem. Hashtags are atomic: their "stem" is the
/// lowercased literal, so `#Tag/Sub` only ever matches itself.
pub fn stem(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.starts_with('#') {
        return lower;
    }
    stemmer().stem(&lower).into_owned()
}

/// Split a keyword phrase into its constituent terms. Commas and whitespace
/// both separate; surrounding literal quotes are stripped.
pub fn split_terms(phrase: &str) -> Vec<String> {
    phrase
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

fn is_hashtag_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '/'
}

/// Split text into terms with positions. Never fails; empty input yields no
/// tokens. Hashtags (`#tag`, `#tag/subtag`) are kept as single atomic tokens.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut position = 0usize;

    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '\n' {
            line += 1;
            continue;
        }

        let (is_tag, starts_word) = if c == '#' {
            match chars.peek() {
                Some((_, next)) if next.is_alphanumeric() => (true, true),
                _ => (false, false),
            }
        } else {
            (false, is_word_char(c) && c != '\'')
        };
        if !starts_word {
            continue;
        }

        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            let keep = if is_tag {
                is_hashtag_char(next)
            } else {
                is_word_char(next)
            };
            if !keep {
                break;
            }
            end = i + next.len_utf8();
            chars.next();
        }

        let raw = &text[start..end];
        // A trailing apostrophe is punctuation, not part of the word.
        let raw = raw.trim_end_matches('\'');
        if raw.is_empty() || raw == "#" {
            continue;
        }

        tokens.push(Token {
            raw: raw.to_string(),
            stem: stem(raw),
            position,
            byte_start: start,
            byte_end: start + raw.len(),
            line,
        });
        position += 1;
    }

    tokens
}
