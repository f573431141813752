//! Line-window chunking shared by the parsers: bounded slices with overlap
//! so embeddings keep context across chunk edges.

use crate::domain::Chunk;

/// Upper bound on lines per chunk; roughly the 200-800 token target for
/// typical code line lengths.
pub const MAX_CHUNK_LINES: usize = 100;
/// Lines repeated between consecutive chunks.
pub const CHUNK_OVERLAP_LINES: usize = 10;

/// Split `text` into overlapping line windows. `first_line` is the 1-based
/// line number of the first line of `text` within its file.
pub fn line_chunks(relative_path: &str, text: &str, first_line: u32) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || text.trim().is_empty() {
        return Vec::new();
    }
    if lines.len() <= MAX_CHUNK_LINES {
        return vec![Chunk::new(
            relative_path,
            first_line,
            first_line + lines.len() as u32 - 1,
            text.trim_end_matches('\n'),
        )];
    }

    let step = MAX_CHUNK_LINES - CHUNK_OVERLAP_LINES;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let end = (start + MAX_CHUNK_LINES).min(lines.len());
        chunks.push(Chunk::new(
            relative_path,
            first_line + start as u32,
            first_line + end as u32 - 1,
            lines[start..end].join("\n"),
        ));
        if end == lines.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = line_chunks("a.rs", "fn main() {}\nfn other() {}", 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line(), 1);
        assert_eq!(chunks[0].end_line(), 2);
    }

    #[test]
    fn test_long_text_overlaps() {
        let text: String = (0..250)
            .map(|i| format!("line number {}\n", i))
            .collect();
        let chunks = line_chunks("a.rs", &text, 1);
        assert!(chunks.len() > 1);

        // Consecutive chunks share the overlap region.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line() < pair[0].end_line());
        }
        // Every line is covered.
        assert_eq!(chunks.first().map(|c| c.start_line()), Some(1));
        assert_eq!(chunks.last().map(|c| c.end_line()), Some(250));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(line_chunks("a.rs", "", 1).is_empty());
        assert!(line_chunks("a.rs", "   \n  \n", 1).is_empty());
    }

    #[test]
    fn test_first_line_offset() {
        let chunks = line_chunks("a.rs", "x\ny", 40);
        assert_eq!(chunks[0].start_line(), 40);
        assert_eq!(chunks[0].end_line(), 41);
    }
}
