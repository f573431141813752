//! Generic fallback plugin: identifier heuristics over raw lines for any
//! language without a dedicated parser, plus plain line-window chunking.
//! Good enough to populate FTS and catch obvious definitions; never the
//! source of precise symbol data.

use regex::Regex;

use crate::application::interfaces::{ParseResult, Plugin};
use crate::connector::adapter::chunking::line_chunks;
use crate::domain::{EngineError, Symbol, SymbolKind};

pub struct FallbackPlugin {
    patterns: Vec<(Regex, SymbolKind)>,
}

impl FallbackPlugin {
    pub fn new() -> Self {
        let sources: &[(&str, SymbolKind)] = &[
            (r"^\s*(?:pub\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Function),
            (r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Function),
            (
                r"^\s*(?:export\s+)?(?:async\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)",
                SymbolKind::Function,
            ),
            (r"^\s*(?:func)\s+(?:\([^)]*\)\s+)?([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Function),
            (r"^\s*(?:export\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)", SymbolKind::Class),
            (r"^\s*(?:pub\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Struct),
            (r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)", SymbolKind::Interface),
            (r"^\s*(?:pub\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Trait),
            (r"^\s*(?:pub\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Enum),
            (r"^\s*(?:pub\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Module),
            (r"^\s*(?:pub\s+)?(?:const|static)\s+([A-Z_][A-Z0-9_]*)", SymbolKind::Constant),
        ];
        let patterns = sources
            .iter()
            .filter_map(|(source, kind)| Regex::new(source).ok().map(|re| (re, *kind)))
            .collect();
        Self { patterns }
    }
}

impl Default for FallbackPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FallbackPlugin {
    fn language_tag(&self) -> &str {
        "text"
    }

    fn supports(&self, _relative_path: &str) -> bool {
        true
    }

    fn parse(&self, bytes: &[u8], relative_path: &str) -> Result<ParseResult, EngineError> {
        let source = String::from_utf8_lossy(bytes);

        let mut symbols = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line_number = index as u32 + 1;
            for (pattern, kind) in &self.patterns {
                if let Some(captures) = pattern.captures(line) {
                    if let Some(name) = captures.get(1) {
                        symbols.push(
                            Symbol::new(name.as_str(), *kind, line_number, line_number)
                                .with_signature(line.trim())
                                .with_columns(name.start() as u32, name.end() as u32),
                        );
                        break;
                    }
                }
            }
        }

        let chunks = line_chunks(relative_path, &source, 1);
        // Heuristic extraction is best-effort by definition.
        Ok(ParseResult::new(symbols, chunks).best_effort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_common_definition_shapes() {
        let plugin = FallbackPlugin::new();
        let source = b"pub fn alpha() {}\nclass Beta:\ninterface Gamma {}\nconst MAX_SIZE = 10\n";
        let result = plugin.parse(source, "mixed.xyz").unwrap();

        let names: Vec<(&str, SymbolKind)> = result
            .symbols
            .iter()
            .map(|s| (s.name(), s.kind()))
            .collect();
        assert!(names.contains(&("alpha", SymbolKind::Function)));
        assert!(names.contains(&("Beta", SymbolKind::Class)));
        assert!(names.contains(&("Gamma", SymbolKind::Interface)));
        assert!(names.contains(&("MAX_SIZE", SymbolKind::Constant)));
        assert!(result.best_effort);
    }

    #[test]
    fn test_plain_prose_has_chunks_but_no_symbols() {
        let plugin = FallbackPlugin::new();
        let source = b"just some words\nnothing declarative here\n";
        let result = plugin.parse(source, "notes.txt").unwrap();
        assert!(result.symbols.is_empty());
        assert_eq!(result.chunks.len(), 1);
    }

    #[test]
    fn test_supports_everything() {
        let plugin = FallbackPlugin::new();
        assert!(plugin.supports("anything.weird"));
        assert_eq!(plugin.language_tag(), "text");
    }
}
