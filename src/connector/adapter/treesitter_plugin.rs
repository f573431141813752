//! Tree-sitter backed plugins: one per language, each owning a compiled
//! symbol query. Compiling the query is the expensive part and happens at
//! plugin instantiation, which the registry bounds and caches.

use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Node, Parser, Query, QueryCursor};

use crate::application::interfaces::{ParseResult, Plugin};
use crate::application::registry::PluginSpec;
use crate::connector::adapter::chunking::line_chunks;
use crate::domain::{Chunk, EngineError, Language, Symbol, SymbolKind};

const SIGNATURE_MAX_CHARS: usize = 160;
/// Rough resident cost of one loaded grammar + compiled query.
const PLUGIN_MEMORY_COST: u64 = 8 * 1024 * 1024;

pub struct TreeSitterPlugin {
    language: Language,
    ts_language: tree_sitter::Language,
    query: Query,
}

impl TreeSitterPlugin {
    pub fn new(language: Language) -> Result<Self, EngineError> {
        let ts_language = ts_language(language).ok_or_else(|| {
            EngineError::parse(format!("no tree-sitter grammar for {}", language))
        })?;
        let query = Query::new(&ts_language, query_patterns(language))
            .map_err(|e| EngineError::parse(format!("failed to compile query: {}", e)))?;
        Ok(Self {
            language,
            ts_language,
            query,
        })
    }

    fn extract(&self, source: &str, relative_path: &str) -> Result<ParseResult, EngineError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.ts_language)
            .map_err(|e| EngineError::parse(format!("failed to set language: {}", e)))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| EngineError::parse("tree-sitter returned no tree"))?;
        let recovered = tree.root_node().has_error();

        let mut cursor = QueryCursor::new();
        let capture_names: Vec<&str> = self.query.capture_names().to_vec();
        let text_bytes = source.as_bytes();

        let mut symbols: Vec<Symbol> = Vec::new();
        let mut chunks: Vec<Chunk> = Vec::new();

        let mut matches_iter = cursor.matches(&self.query, tree.root_node(), text_bytes);
        while let Some(query_match) = matches_iter.next() {
            let mut symbol_name: Option<String> = None;
            let mut main_node: Option<Node> = None;
            let mut kind = SymbolKind::Other;

            for capture in query_match.captures {
                let capture_name = capture_names
                    .get(capture.index as usize)
                    .copied()
                    .unwrap_or("");
                if capture_name == "name" {
                    symbol_name = Some(source[capture.node.byte_range()].to_string());
                } else {
                    main_node = Some(capture.node);
                    kind = capture_to_kind(capture_name);
                }
            }

            let (Some(name), Some(node)) = (symbol_name, main_node) else {
                continue;
            };

            let start_line = node.start_position().row as u32 + 1;
            let end_line = node.end_position().row as u32 + 1;
            let parent = enclosing_type_name(node, source);

            // A function nested in a type container is a method.
            let kind = match (kind, &parent) {
                (SymbolKind::Function, Some(_)) => SymbolKind::Method,
                (kind, _) => kind,
            };

            let is_nested = parent.is_some();
            let mut symbol = Symbol::new(name, kind, start_line, end_line)
                .with_signature(signature_of(node, source))
                .with_columns(
                    node.start_position().column as u32,
                    node.end_position().column as u32,
                );
            if let Some(parent) = parent {
                symbol = symbol.with_parent(parent);
            }
            symbols.push(symbol);

            // Top-level captures double as chunk boundaries; nested symbols
            // are covered by their container's chunk.
            if !is_nested {
                let node_text = &source[node.byte_range()];
                if node_text.trim().len() >= 10 {
                    chunks.extend(line_chunks(relative_path, node_text, start_line));
                }
            }
        }

        if chunks.is_empty() {
            chunks = line_chunks(relative_path, source, 1);
        }

        debug!(
            "Parsed {}: {} symbols, {} chunks ({})",
            relative_path,
            symbols.len(),
            chunks.len(),
            self.language
        );

        let result = ParseResult::new(symbols, chunks);
        Ok(if recovered { result.best_effort() } else { result })
    }
}

impl Plugin for TreeSitterPlugin {
    fn language_tag(&self) -> &str {
        self.language.as_str()
    }

    fn supports(&self, relative_path: &str) -> bool {
        let extension = relative_path.rsplit('.').next().unwrap_or("");
        self.language.extensions().contains(&extension)
    }

    fn parse(&self, bytes: &[u8], relative_path: &str) -> Result<ParseResult, EngineError> {
        let source = String::from_utf8_lossy(bytes);
        self.extract(&source, relative_path)
    }
}

/// The built-in plugin set, lazily constructed by the registry.
pub fn default_plugin_specs() -> Vec<PluginSpec> {
    Language::all_supported()
        .into_iter()
        .map(|language| {
            PluginSpec::new(
                language,
                language.extensions().to_vec(),
                0,
                PLUGIN_MEMORY_COST,
                move || Ok(Box::new(TreeSitterPlugin::new(language)?) as Box<dyn Plugin>),
            )
        })
        .collect()
}

fn ts_language(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Unknown => None,
    }
}

fn query_patterns(language: Language) -> &'static str {
    match language {
        Language::Rust => {
            r#"
            (function_item name: (identifier) @name) @function
            (struct_item name: (type_identifier) @name) @struct
            (enum_item name: (type_identifier) @name) @enum
            (trait_item name: (type_identifier) @name) @trait
            (mod_item name: (identifier) @name) @module
            (const_item name: (identifier) @name) @constant
            (static_item name: (identifier) @name) @constant
            (type_item name: (type_identifier) @name) @type_alias
            "#
        }
        Language::Python => {
            r#"
            (function_definition name: (identifier) @name) @function
            (class_definition name: (identifier) @name) @class
            "#
        }
        Language::JavaScript => {
            r#"
            (function_declaration name: (identifier) @name) @function
            (class_declaration name: (identifier) @name) @class
            (method_definition name: (property_identifier) @name) @method
            (lexical_declaration
              (variable_declarator
                name: (identifier) @name
                value: (arrow_function))) @function
            "#
        }
        Language::TypeScript => {
            r#"
            (function_declaration name: (identifier) @name) @function
            (class_declaration name: (type_identifier) @name) @class
            (method_definition name: (property_identifier) @name) @method
            (interface_declaration name: (type_identifier) @name) @interface
            (type_alias_declaration name: (type_identifier) @name) @type_alias
            (enum_declaration name: (identifier) @name) @enum
            (lexical_declaration
              (variable_declarator
                name: (identifier) @name
                value: (arrow_function))) @function
            "#
        }
        Language::Go => {
            r#"
            (function_declaration name: (identifier) @name) @function
            (method_declaration name: (field_identifier) @name) @method
            (type_declaration
              (type_spec name: (type_identifier) @name type: (struct_type))) @struct
            (type_declaration
              (type_spec name: (type_identifier) @name type: (interface_type))) @interface
            (const_declaration (const_spec name: (identifier) @name)) @constant
            "#
        }
        Language::Unknown => "",
    }
}

fn capture_to_kind(capture_name: &str) -> SymbolKind {
    match capture_name {
        "function" => SymbolKind::Function,
        "method" => SymbolKind::Method,
        "class" => SymbolKind::Class,
        "struct" => SymbolKind::Struct,
        "interface" => SymbolKind::Interface,
        "trait" => SymbolKind::Trait,
        "enum" => SymbolKind::Enum,
        "variable" => SymbolKind::Variable,
        "constant" => SymbolKind::Constant,
        "type_alias" => SymbolKind::TypeAlias,
        "module" => SymbolKind::Module,
        _ => SymbolKind::Other,
    }
}

/// Name of the nearest enclosing type container (impl block, class), used
/// for method detection and `parent_name`.
fn enclosing_type_name(node: Node, source: &str) -> Option<String> {
    let mut current = node.parent();
    while let Some(candidate) = current {
        let name_node = match candidate.kind() {
            "impl_item" => candidate.child_by_field_name("type"),
            "class_definition" | "class_declaration" | "trait_item" => {
                candidate.child_by_field_name("name")
            }
            _ => None,
        };
        if let Some(name_node) = name_node {
            return Some(source[name_node.byte_range()].to_string());
        }
        current = candidate.parent();
    }
    None
}

fn signature_of(node: Node, source: &str) -> String {
    let text = &source[node.byte_range()];
    let first_line = text.lines().next().unwrap_or("").trim();
    let trimmed = first_line
        .trim_end_matches('{')
        .trim_end_matches(':')
        .trim_end();
    trimmed.chars().take(SIGNATURE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_symbols() {
        let plugin = TreeSitterPlugin::new(Language::Rust).unwrap();
        let source = r#"
pub struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    pub fn parse(&mut self) -> usize {
        self.buffer.len()
    }
}

pub fn standalone() {}
"#;
        let result = plugin.parse(source.as_bytes(), "src/parser.rs").unwrap();
        assert!(!result.best_effort);

        let parser = result
            .symbols
            .iter()
            .find(|s| s.name() == "Parser")
            .unwrap();
        assert_eq!(parser.kind(), SymbolKind::Struct);
        assert_eq!(parser.start_line(), 2);

        let parse = result.symbols.iter().find(|s| s.name() == "parse").unwrap();
        assert_eq!(parse.kind(), SymbolKind::Method);
        assert_eq!(parse.parent_name(), Some("Parser"));

        let standalone = result
            .symbols
            .iter()
            .find(|s| s.name() == "standalone")
            .unwrap();
        assert_eq!(standalone.kind(), SymbolKind::Function);
        assert!(standalone.parent_name().is_none());

        assert!(!result.chunks.is_empty());
    }

    #[test]
    fn test_python_class_and_method_lines() {
        let plugin = TreeSitterPlugin::new(Language::Python).unwrap();
        let source = "\n\nclass Parser:\n    def parse(self):\n        return 1\n";
        let result = plugin.parse(source.as_bytes(), "src/parser.py").unwrap();

        let class = result
            .symbols
            .iter()
            .find(|s| s.name() == "Parser")
            .unwrap();
        assert_eq!(class.kind(), SymbolKind::Class);
        assert_eq!(class.start_line(), 3);
        assert_eq!(class.signature(), Some("class Parser"));

        let method = result.symbols.iter().find(|s| s.name() == "parse").unwrap();
        assert_eq!(method.kind(), SymbolKind::Method);
        assert_eq!(method.parent_name(), Some("Parser"));
        assert_eq!(method.start_line(), 4);
    }

    #[test]
    fn test_typescript_interfaces_and_aliases() {
        let plugin = TreeSitterPlugin::new(Language::TypeScript).unwrap();
        let source = "interface Shape { area(): number }\ntype Alias = string;\n";
        let result = plugin.parse(source.as_bytes(), "src/shapes.ts").unwrap();

        assert!(result
            .symbols
            .iter()
            .any(|s| s.name() == "Shape" && s.kind() == SymbolKind::Interface));
        assert!(result
            .symbols
            .iter()
            .any(|s| s.name() == "Alias" && s.kind() == SymbolKind::TypeAlias));
    }

    #[test]
    fn test_malformed_input_is_best_effort() {
        let plugin = TreeSitterPlugin::new(Language::Rust).unwrap();
        let source = "fn broken( {\nfn intact() {}\n";
        let result = plugin.parse(source.as_bytes(), "src/broken.rs").unwrap();
        assert!(result.best_effort);
        assert!(result.symbols.iter().any(|s| s.name() == "intact"));
    }

    #[test]
    fn test_supports_by_extension() {
        let plugin = TreeSitterPlugin::new(Language::Go).unwrap();
        assert!(plugin.supports("cmd/main.go"));
        assert!(!plugin.supports("cmd/main.rs"));
        assert_eq!(plugin.language_tag(), "go");
    }

    #[test]
    fn test_file_without_symbols_still_chunks() {
        let plugin = TreeSitterPlugin::new(Language::Python).unwrap();
        let source = "print('just a script')\nprint('no defs here')\n";
        let result = plugin.parse(source.as_bytes(), "script.py").unwrap();
        assert!(result.symbols.is_empty());
        assert_eq!(result.chunks.len(), 1);
    }
}
