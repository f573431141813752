use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::application::interfaces::Reranker;
use crate::application::query::parse_query;
use crate::domain::{EngineError, Hit, HitSource};

/// In-process TF-IDF reranker over hit snippets. Always available, no
/// model, no network; this is the terminal fallback of every rerank chain.
pub struct TfIdfReranker;

impl TfIdfReranker {
    pub fn new() -> Self {
        Self
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }

    fn score_hits(query: &str, hits: &[Hit]) -> Vec<f32> {
        let query_terms: Vec<String> = parse_query(query)
            .positive_tokens()
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        if query_terms.is_empty() {
            return vec![0.0; hits.len()];
        }

        let docs: Vec<Vec<String>> = hits
            .iter()
            .map(|hit| Self::tokenize(&hit.snippet))
            .collect();
        let doc_count = docs.len().max(1) as f32;

        // document frequency per query term
        let mut df: HashMap<&str, f32> = HashMap::new();
        for doc in &docs {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in &query_terms {
                if unique.contains(term.as_str()) {
                    *df.entry(term.as_str()).or_insert(0.0) += 1.0;
                }
            }
        }

        docs.iter()
            .map(|doc| {
                if doc.is_empty() {
                    return 0.0;
                }
                let len = doc.len() as f32;
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = doc.iter().filter(|t| *t == term).count() as f32 / len;
                        let idf = (doc_count / (1.0 + df.get(term.as_str()).copied().unwrap_or(0.0)))
                            .ln()
                            + 1.0;
                        tf * idf
                    })
                    .sum()
            })
            .collect()
    }
}

impl Default for TfIdfReranker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reranker for TfIdfReranker {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<Hit>,
        top_k: usize,
    ) -> Result<Vec<Hit>, EngineError> {
        let scores = Self::score_hits(query, &hits);

        let mut ranked: Vec<(usize, Hit, f32)> = hits
            .into_iter()
            .zip(scores)
            .enumerate()
            .map(|(rank, (hit, score))| (rank, hit, score))
            .collect();
        // Stable on the incoming rank so equal scores keep their order.
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(_, mut hit, score)| {
                hit.score = score;
                hit.source = HitSource::Rerank;
                hit
            })
            .collect())
    }

    fn name(&self) -> &str {
        "tfidf"
    }
}
