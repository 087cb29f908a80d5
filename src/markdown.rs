use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// One run of indexable text with its location in the source document.
#[derive(Debug, Clone)]
pub struct TextSegment {
    pub text: String,
    pub byte_start: usize,
    /// 1-based line of the segment start.
    pub line: usize,
}

/// Extract the visible, indexable text of a Markdown document.
///
/// Link targets, image URLs and raw HTML never reach the term index — only
/// the text a reader sees. Code spans and fenced blocks are kept: notes are
/// routinely searched for identifiers.
pub fn extract_indexable_text(source: &str) -> Vec<TextSegment> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let starts = line_starts(source);
    let mut segments = Vec::new();
    let mut in_image = false;

    for (event, range) in Parser::new_ext(source, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Image { .. }) => in_image = true,
            Event::End(TagEnd::Image) => in_image = false,
            Event::Text(text) | Event::Code(text) => {
                if in_image || text.trim().is_empty() {
                    continue;
                }
                segments.push(TextSegment {
                    text: text.to_string(),
                    byte_start: range.start,
                    line: line_of(&starts, range.start),
                });
            }
            _ => {}
        }
    }

    segments
}

/// Byte offsets at which each source line begins.
pub fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 1-based line containing `byte_offset`.
pub fn line_of(starts: &[usize], byte_offset: usize) -> usize {
    match starts.binary_search(&byte_offset) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}
