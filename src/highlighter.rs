use crate::config::EngineConfig;
use crate::models::{ExcerptBlock, PaginatedSearchResult};
use crate::tokenizer::{self, Token};
use std::collections::HashSet;
use std::ops::Range;

/// Render matched spans inside a document's lines. Matching is stem-aware,
/// multi-word keywords split into independent word sets, adjacent matches
/// merge into one span, and lines carrying nothing but highlighted connector
/// words are folded away. Never fails on malformed input — worst case is an
/// empty result.
pub fn highlight(
    content: &str,
    keywords_matched: &[String],
    path: &str,
    config: &EngineConfig,
) -> Vec<ExcerptBlock> {
    let targets = target_stems(keywords_matched);
    if targets.is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if let Some(block) = highlight_line(line, line_idx + 1, &targets, path, config) {
            blocks.push(block);
        }
    }

    // Densest regions first, then source order.
    blocks.sort_by(|a, b| {
        b.span_count
            .cmp(&a.span_count)
            .then_with(|| a.line.cmp(&b.line))
    });
    blocks
}

/// Every constituent word of every keyword entry, stemmed. A comma- or
/// space-separated phrase contributes independent word targets, not one
/// literal substring.
fn target_stems(keywords: &[String]) -> HashSet<String> {
    let mut targets = HashSet::new();
    for keyword in keywords {
        for term in tokenizer::split_terms(keyword) {
            targets.insert(tokenizer::stem(&term));
        }
    }
    targets
}

fn highlight_line(
    line: &str,
    line_number: usize,
    targets: &HashSet<String>,
    path: &str,
    config: &EngineConfig,
) -> Option<ExcerptBlock> {
    let masked = link_url_ranges(line);
    let tokens = tokenizer::tokenize(line);

    let matched: Vec<&Token> = tokens
        .iter()
        .filter(|t| targets.contains(&t.stem) && !in_masked(&masked, t.byte_start))
        .collect();
    if matched.is_empty() {
        return None;
    }

    // Connector-only lines fold into the surrounding context: nothing on the
    // line, highlighted or not, carries information.
    if tokens.iter().all(|t| tokenizer::is_stopword(&t.raw)) {
        return None;
    }

    let spans = merge_adjacent(line, &matched);
    let rendered = render_line(line, &spans, &config.highlight_marker);

    let start_byte = spans.first()?.start;
    let end_byte = spans.last()?.end;

    Some(ExcerptBlock {
        path: path.to_string(),
        line: line_number,
        start: char_offset(line, start_byte),
        end: char_offset(line, end_byte),
        rendered,
        span_count: spans.len(),
    })
}

/// Merge matched tokens separated only by whitespace into single spans.
/// `black cat` stays one span; `cat, white` stays two — punctuation breaks
/// the run.
fn merge_adjacent(line: &str, matched: &[&Token]) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    for token in matched {
        if let Some(last) = spans.last_mut() {
            let gap = &line[last.end..token.byte_start];
            if !gap.is_empty() && gap.chars().all(char::is_whitespace) {
                last.end = token.byte_end;
                continue;
            }
        }
        spans.push(token.byte_start..token.byte_end);
    }
    spans
}

/// Wrap each span in the marker. A span already wrapped in the marker is
/// left alone, which makes rendering idempotent.
fn render_line(line: &str, spans: &[Range<usize>], marker: &str) -> String {
    let mut out = String::with_capacity(line.len() + spans.len() * marker.len() * 2);
    let mut cursor = 0;
    for span in spans {
        out.push_str(&line[cursor..span.start]);
        let already = span.start >= marker.len()
            && line[..span.start].ends_with(marker)
            && line[span.end..].starts_with(marker);
        if already {
            out.push_str(&line[span.start..span.end]);
        } else {
            out.push_str(marker);
            out.push_str(&line[span.start..span.end]);
            out.push_str(marker);
        }
        cursor = span.end;
    }
    out.push_str(&line[cursor..]);
    out
}

/// Byte ranges of `(url)` targets in `[text](url)` links. Visible link text
/// stays highlightable; the target never does.
fn link_url_ranges(line: &str) -> Vec<Range<usize>> {
    let bytes = line.as_bytes();
    let mut ranges = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close_bracket) = find_byte(bytes, i + 1, b']') {
                if bytes.get(close_bracket + 1) == Some(&b'(') {
                    if let Some(close_paren) = find_byte(bytes, close_bracket + 2, b')') {
                        ranges.push(close_bracket + 1..close_paren + 1);
                        i = close_paren + 1;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    ranges
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|p| p + from)
}

fn in_masked(ranges: &[Range<usize>], byte: usize) -> bool {
    ranges.iter().any(|r| r.contains(&byte))
}

fn char_offset(line: &str, byte: usize) -> usize {
    line[..byte.min(line.len())].chars().count()
}

/// Slice a block list into one page. Pages are 1-based; ordering of the
/// input is preserved.
pub fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> PaginatedSearchResult<T> {
    let limit = limit.max(1);
    let page = page.max(1);
    let total_count = items.len();
    let total_pages = total_count.div_ceil(limit);
    let start = (page - 1).saturating_mul(limit);
    let slice = if start >= total_count {
        Vec::new()
    } else {
        items[start..(start + limit).min(total_count)].to_vec()
    };

    PaginatedSearchResult {
        condition_results: slice,
        total_count,
        page,
        limit,
        total_pages,
    }
}

/// Render one page of excerpt blocks as text: a header with the total count,
/// sequentially numbered callout regions, and a page footer.
pub fn format_page(page: &PaginatedSearchResult<ExcerptBlock>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Found {} matching excerpt(s)\n", page.total_count));

    let base = (page.page - 1) * page.limit;
    for (i, block) in page.condition_results.iter().enumerate() {
        out.push_str(&format!(
            "{}. > {}:{} [{}..{}]\n> {}\n",
            base + i + 1,
            block.path,
            block.line,
            block.start,
            block.end,
            block.rendered
        ));
    }

    out.push_str(&format!(
        "Page {} of {} ({} total)\n",
        page.page,
        page.total_pages.max(1),
        page.total_count
    ));
    out
}
