use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::SymbolKind;

/// Which backend produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Symbol,
    FtsCode,
    FtsSymbol,
    Vector,
    Rerank,
}

impl HitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitSource::Symbol => "symbol",
            HitSource::FtsCode => "fts_code",
            HitSource::FtsSymbol => "fts_symbol",
            HitSource::Vector => "vector",
            HitSource::Rerank => "rerank",
        }
    }
}

/// One query result row. This is a wire-facing shape: fields are public and
/// serialized as-is by the tools façade.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Hit {
    /// Repository-relative, forward-slash path
    pub relative_path: String,

    /// 1-based line of the match (or symbol definition)
    pub line: u32,

    /// 1-based last line covered by the hit
    pub end_line: u32,

    /// Context around the match, at most 240 characters
    pub snippet: String,

    /// Byte offsets of matched spans within `snippet`
    pub highlights: Vec<(u32, u32)>,

    /// Symbol kind, when the hit is a definition
    pub kind: Option<SymbolKind>,

    /// Symbol signature, when available
    pub signature: Option<String>,

    /// Backend-specific relevance score, higher is better
    pub score: f32,

    /// Which backend produced this hit
    pub source: HitSource,
}

impl Hit {
    pub fn new(
        relative_path: impl Into<String>,
        line: u32,
        end_line: u32,
        snippet: impl Into<String>,
        score: f32,
        source: HitSource,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            line,
            end_line,
            snippet: snippet.into(),
            highlights: Vec::new(),
            kind: None,
            signature: None,
            score,
            source,
        }
    }

    pub fn with_symbol(mut self, kind: SymbolKind, signature: Option<String>) -> Self {
        self.kind = Some(kind);
        self.signature = signature;
        self
    }

    pub fn with_highlights(mut self, highlights: Vec<(u32, u32)>) -> Self {
        self.highlights = highlights;
        self
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.relative_path, self.line)
    }
}

/// Response of a code search: hits plus the flags that let a client tell
/// "no matches" apart from "matches lost to timeout or a missing backend".
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SearchOutcome {
    pub hits: Vec<Hit>,
    pub partial: bool,
    pub degraded: bool,
    pub errors: Vec<String>,
}

impl SearchOutcome {
    pub fn of(hits: Vec<Hit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }
}

/// Response of a symbol lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LookupOutcome {
    pub hits: Vec<Hit>,
    pub partial: bool,
}

/// One per-file indexing failure inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexFailure {
    pub path: String,
    pub reason: String,
}

/// Result of an indexing batch. Individual file failures land in `errors`
/// and never abort the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IndexReport {
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errored: u64,
    pub errors: Vec<IndexFailure>,
}

impl IndexReport {
    pub fn record_error(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.errored += 1;
        self.errors.push(IndexFailure {
            path: path.into(),
            reason: reason.into(),
        });
    }

    pub fn merge(&mut self, other: IndexReport) {
        self.indexed += other.indexed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.errors.extend(other.errors);
    }

    pub fn total(&self) -> u64 {
        self.indexed + self.unchanged + self.skipped + self.errored
    }
}
