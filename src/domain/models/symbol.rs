use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The kind of code construct a symbol denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Variable,
    Constant,
    TypeAlias,
    Module,
    Other,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Module => "module",
            SymbolKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
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
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A definition extracted from a single file. Lines are 1-based, columns
/// 0-based. Symbols are file-local; cross-file resolution is not modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    name: String,
    kind: SymbolKind,
    signature: Option<String>,
    start_line: u32,
    end_line: u32,
    start_col: u32,
    end_col: u32,
    parent_name: Option<String>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, start_line: u32, end_line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            signature: None,
            start_line,
            end_line,
            start_col: 0,
            end_col: 0,
            parent_name: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_columns(mut self, start_col: u32, end_col: u32) -> Self {
        self.start_col = start_col;
        self.end_col = end_col;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_name = Some(parent.into());
        self
    }

    /// Reconstitutes from persisted data (used by adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        name: String,
        kind: SymbolKind,
        signature: Option<String>,
        start_line: u32,
        end_line: u32,
        start_col: u32,
        end_col: u32,
        parent_name: Option<String>,
    ) -> Self {
        Self {
            name,
            kind,
            signature,
            start_line,
            end_line,
            start_col,
            end_col,
            parent_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn start_col(&self) -> u32 {
        self.start_col
    }

    pub fn end_col(&self) -> u32 {
        self.end_col
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    pub fn qualified_name(&self) -> String {
        match &self.parent_name {
            Some(parent) => format!("{}::{}", parent, self.name),
            None => self.name.clone(),
        }
    }

    /// One line of the per-file symbol FTS document: the name, its
    /// camelCase/snake_case parts (so "dispatcher" finds
    /// `RequestDispatcher`), the kind, the signature and the parent.
    pub fn fts_line(&self) -> String {
        let mut line = self.name.clone();
        for part in split_identifier(&self.name) {
            if !part.eq_ignore_ascii_case(&self.name) {
                line.push(' ');
                line.push_str(&part);
            }
        }
        line.push(' ');
        line.push_str(self.kind.as_str());
        if let Some(sig) = &self.signature {
            line.push(' ');
            line.push_str(sig);
        }
        if let Some(parent) = &self.parent_name {
            line.push(' ');
            line.push_str(parent);
        }
        line
    }
}

/// Split an identifier into lowercase parts on underscores and camelCase
/// boundaries: `parse_request` → [parse, request], `HttpServer` → [http,
/// server].
pub fn split_identifier(name: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' || c == '$' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
        previous_lower = c.is_lowercase() || c.is_numeric();
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
