use crate::domain::{Chunk, EngineError, Symbol};

/// Output of parsing one file. `best_effort` is set when the parser
/// recovered from errors; only a total failure returns `Err`.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub symbols: Vec<Symbol>,
    pub chunks: Vec<Chunk>,
    pub best_effort: bool,
}

impl ParseResult {
    pub fn new(symbols: Vec<Symbol>, chunks: Vec<Chunk>) -> Self {
        Self {
            symbols,
            chunks,
            best_effort: false,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// A language-specific parser/extractor.
///
/// Parsing is synchronous CPU work; the indexing engine runs it on the
/// blocking pool under a wall-clock bound and catches panics, so
/// implementations are free to be strict.
pub trait Plugin: Send + Sync {
    /// Stable tag stored in the file's `language` field.
    fn language_tag(&self) -> &str;

    /// Extension- and name-based routing check.
    fn supports(&self, relative_path: &str) -> bool;

    /// Extract symbols and chunks from file bytes.
    fn parse(&self, bytes: &[u8], relative_path: &str) -> Result<ParseResult, EngineError>;
}
