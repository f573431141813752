//! Snippet extraction: a bounded window of the matched document with byte
//! offsets for every matched term, so clients can render highlights without
//! re-tokenizing.

/// Maximum snippet length in bytes.
pub const MAX_SNIPPET_BYTES: usize = 240;

#[derive(Debug, Clone)]
pub struct SnippetSpan {
    pub snippet: String,
    pub highlights: Vec<(u32, u32)>,
    pub line: u32,
    pub end_line: u32,
}

/// Build a snippet of `body` centered on the first occurrence of any token.
/// Matching is ASCII-case-insensitive so highlight offsets stay valid byte
/// offsets into the snippet.
pub fn build(body: &str, tokens: &[String]) -> SnippetSpan {
    let first_match = tokens
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| find_ascii_ci(body, t, 0))
        .min();

    let anchor = first_match.unwrap_or(0);
    let line = body[..anchor].bytes().filter(|b| *b == b'\n').count() as u32 + 1;

    // Window starts at the matched line unless the match sits too deep in
    // an overlong line, in which case it shifts right to keep the match.
    let line_start = body[..anchor].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let start = if anchor - line_start + 32 > MAX_SNIPPET_BYTES {
        floor_boundary(body, anchor.saturating_sub(MAX_SNIPPET_BYTES / 3))
    } else {
        line_start
    };

    let end = floor_boundary(body, (start + MAX_SNIPPET_BYTES).min(body.len()));
    let snippet_raw = &body[start..end];
    // Trim a trailing partial line unless that would lose the match itself.
    let snippet = match snippet_raw.rfind('\n') {
        Some(last_newline)
            if end < body.len() && start + last_newline > anchor && last_newline > 0 =>
        {
            &snippet_raw[..last_newline]
        }
        _ => snippet_raw,
    };
    let snippet = snippet.trim_end_matches('\n');

    let highlights = highlight_offsets(snippet, tokens);
    let end_line = line + snippet.bytes().filter(|b| *b == b'\n').count() as u32;

    SnippetSpan {
        snippet: snippet.to_string(),
        highlights,
        line,
        end_line,
    }
}

/// Byte offsets of every token occurrence in `snippet`, sorted and
/// non-overlapping (earlier spans win).
pub fn highlight_offsets(snippet: &str, tokens: &[String]) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(pos) = find_ascii_ci(snippet, token, from) {
            spans.push((pos as u32, (pos + token.len()) as u32));
            from = pos + token.len();
        }
    }
    spans.sort_unstable();
    spans.dedup();

    let mut merged: Vec<(u32, u32)> = Vec::new();
    for span in spans {
        match merged.last() {
            Some(last) if span.0 < last.1 => {}
            _ => merged.push(span),
        }
    }
    merged
}

/// ASCII-case-insensitive substring search returning a byte offset.
fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.is_empty() || haystack_bytes.len() < needle_bytes.len() {
        return None;
    }
    let last = haystack_bytes.len() - needle_bytes.len();
    for start in from..=last {
        if haystack_bytes[start..start + needle_bytes.len()].eq_ignore_ascii_case(needle_bytes)
            && haystack.is_char_boundary(start)
            && haystack.is_char_boundary(start + needle_bytes.len())
        {
            return Some(start);
        }
    }
    None
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_snippet_finds_line() {
        let body = "line one\nline two\nfn target() {}\nline four\n";
        let span = build(body, &tokens(&["target"]));
        assert_eq!(span.line, 3);
        assert!(span.snippet.contains("fn target()"));
    }

    #[test]
    fn test_snippet_bounded() {
        let long_line = "x".repeat(1000);
        let span = build(&long_line, &tokens(&["zzz"]));
        assert!(span.snippet.len() <= MAX_SNIPPET_BYTES);
        assert_eq!(span.line, 1);
    }

    #[test]
    fn test_highlights_are_byte_offsets() {
        let span = build("let needle = Needle::new();", &tokens(&["needle"]));
        assert_eq!(span.highlights, vec![(4, 10), (13, 19)]);
        for (start, end) in &span.highlights {
            assert_eq!(
                span.snippet[*start as usize..*end as usize].to_ascii_lowercase(),
                "needle"
            );
        }
    }

    #[test]
    fn test_match_deep_in_long_line_stays_visible() {
        let mut body = " ".repeat(500);
        body.push_str("beacon");
        let span = build(&body, &tokens(&["beacon"]));
        assert!(span.snippet.contains("beacon"));
        assert!(!span.highlights.is_empty());
    }

    #[test]
    fn test_no_match_uses_document_head() {
        let span = build("first line\nsecond line\n", &tokens(&["absent"]));
        assert_eq!(span.line, 1);
        assert!(span.snippet.starts_with("first line"));
        assert!(span.highlights.is_empty());
    }

    #[test]
    fn test_overlapping_highlights_merge() {
        let offsets = highlight_offsets("abcabc", &tokens(&["abc", "abca"]));
        // "abca" at 0 and "abc" at 0/3; overlapping spans keep the earliest.
        assert_eq!(offsets.first(), Some(&(0, 3)));
        assert_eq!(offsets.last(), Some(&(3, 6)));
    }
}
