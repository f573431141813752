//! Best-effort bag-of-terms query parsing, shared by the FTS backend, the
//! snippet highlighter and the TF-IDF reranker.

/// A parsed user query: positive terms, quoted phrases and negated terms.
/// Operators the engine does not support are stripped, never an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub negated: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty()
    }

    /// All positive tokens, phrase words included; used for highlighting.
    pub fn positive_tokens(&self) -> Vec<String> {
        let mut tokens = self.terms.clone();
        for phrase in &self.phrases {
            tokens.extend(phrase.split_whitespace().map(str::to_string));
        }
        tokens
    }
}

/// Characters FTS engines treat as syntax; stripped from bare terms.
const STRIPPED: &[char] = &['(', ')', '*', '^', ':', '{', '}', '[', ']', '~'];

pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        if let Some(after) = rest.strip_prefix('"') {
            // Quoted phrase; an unterminated quote runs to the end.
            let (phrase, tail) = match after.find('"') {
                Some(end) => (&after[..end], &after[end + 1..]),
                None => (after, ""),
            };
            let phrase = phrase.trim();
            if !phrase.is_empty() {
                parsed.phrases.push(phrase.to_string());
            }
            rest = tail;
            continue;
        }

        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(end);
        rest = tail;

        let (negated, word) = match word.strip_prefix('-') {
            Some(stripped) => (true, stripped),
            None => (false, word),
        };

        let cleaned: String = word.chars().filter(|c| !STRIPPED.contains(c)).collect();
        let cleaned = cleaned.trim_matches('"').to_string();
        if cleaned.is_empty() {
            continue;
        }
        // Boolean keywords are operators in most FTS dialects; treat them
        // as plain stripped syntax unless quoted.
        if matches!(cleaned.as_str(), "AND" | "OR" | "NOT" | "NEAR") {
            continue;
        }

        if negated {
            parsed.negated.push(cleaned);
        } else {
            parsed.terms.push(cleaned);
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_terms() {
        let parsed = parse_query("foo bar baz");
        assert_eq!(parsed.terms, vec!["foo", "bar", "baz"]);
        assert!(parsed.phrases.is_empty());
        assert!(parsed.negated.is_empty());
    }

    #[test]
    fn test_phrases_and_negation() {
        let parsed = parse_query("\"hash map\" lookup -test");
        assert_eq!(parsed.phrases, vec!["hash map"]);
        assert_eq!(parsed.terms, vec!["lookup"]);
        assert_eq!(parsed.negated, vec!["test"]);
    }

    #[test]
    fn test_operators_are_stripped() {
        let parsed = parse_query("foo AND (bar OR baz) name:qux wild*");
        assert_eq!(parsed.terms, vec!["foo", "bar", "baz", "namequx", "wild"]);
    }

    #[test]
    fn test_unterminated_quote() {
        let parsed = parse_query("\"dangling phrase");
        assert_eq!(parsed.phrases, vec!["dangling phrase"]);
    }

    #[test]
    fn test_empty_and_negation_only() {
        assert!(parse_query("   ").is_empty());
        let parsed = parse_query("-only -negated");
        assert!(parsed.is_empty());
        assert_eq!(parsed.negated, vec!["only", "negated"]);
    }

    #[test]
    fn test_positive_tokens_include_phrase_words() {
        let parsed = parse_query("\"hash map\" lookup");
        assert_eq!(parsed.positive_tokens(), vec!["lookup", "hash", "map"]);
    }
}
