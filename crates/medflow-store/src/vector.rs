//! Deterministic vector search for tests and offline runs
//!
//! Scores documents by token overlap with the query. Not a real embedding
//! index, but it honors the `VectorSearch` contract and ranks stably, so
//! retrieval-dependent stages can run without the remote index.

use async_trait::async_trait;

use medflow_core::{MedflowResult, SearchHit, VectorSearch};

/// One indexed document
#[derive(Debug, Clone)]
pub struct IndexedCode {
    pub code: String,
    pub title: String,
    pub text: String,
}

/// Token-overlap search over an in-memory corpus
#[derive(Default)]
pub struct MockVectorSearch {
    corpus: Vec<IndexedCode>,
}

impl MockVectorSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, code: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        self.corpus.push(IndexedCode {
            code: code.into(),
            title: title.into(),
            text: text.into(),
        });
        self
    }

    fn score(query_tokens: &[String], doc: &IndexedCode) -> f64 {
        let haystack = format!("{} {}", doc.title, doc.text).to_lowercase();
        let matched = query_tokens
            .iter()
            .filter(|token| haystack.contains(token.as_str()))
            .count();
        if query_tokens.is_empty() {
            0.0
        } else {
            matched as f64 / query_tokens.len() as f64
        }
    }
}

#[async_trait]
impl VectorSearch for MockVectorSearch {
    async fn search(&self, query: &str, top_k: usize) -> MedflowResult<Vec<SearchHit>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(|t| t.to_string())
            .collect();

        let mut scored: Vec<(f64, &IndexedCode)> = self
            .corpus
            .iter()
            .map(|doc| (Self::score(&tokens, doc), doc))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // Stable ranking: score descending, then code ascending
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.code.cmp(&b.1.code))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| SearchHit {
                parent_id: doc.code.clone(),
                code_title: doc.title.clone(),
                chunk: doc.text.clone(),
                search_score: score,
                reranker_score: score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ranking_by_overlap() {
        let search = MockVectorSearch::new()
            .index(
                "49616",
                "Repair of incisional hernia, recurrent, incarcerated",
                "open repair recurrent incarcerated ventral incisional hernia with mesh",
            )
            .index(
                "49505",
                "Repair initial inguinal hernia",
                "open repair initial inguinal hernia patient age 5 years or older",
            );

        let hits = search
            .search("incarcerated recurrent ventral incisional hernia mesh", 5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].parent_id, "49616");
        assert!(hits[0].search_score > hits[1].search_score);
    }

    #[tokio::test]
    async fn test_top_k_and_no_match() {
        let search = MockVectorSearch::new()
            .index("11102", "Tangential biopsy of skin", "biopsy skin lesion")
            .index("11104", "Punch biopsy of skin", "punch biopsy skin lesion");

        let hits = search.search("biopsy skin", 1).await.unwrap();
        assert_eq!(hits.len(), 1);

        let none = search.search("cardiac catheterization", 5).await.unwrap();
        assert!(none.is_empty());
    }
}
