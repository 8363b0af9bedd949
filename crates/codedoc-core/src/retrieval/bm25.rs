//! BM25 scorer over a candidate pool.
//!
//! The sparse arm does not maintain its own inverted index: it scores
//! the dense candidates' content directly, which still rewards exact
//! identifier hits. Corpus statistics (document frequency, average
//! length) are computed over the pool itself.

use std::collections::{HashMap, HashSet};

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Query/code stopwords excluded from scoring.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i",
    "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "what", "when", "where",
    "which", "who", "why", "with",
];

/// Lowercase and split on non-identifier characters, dropping stopwords
/// and single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// BM25 scorer built over a fixed document pool.
pub struct Bm25 {
    doc_tokens: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<f64>,
    avg_doc_length: f64,
    doc_freq: HashMap<String, u32>,
}

impl Bm25 {
    /// Build the scorer from the candidate documents.
    pub fn new(documents: &[&str]) -> Self {
        let mut doc_tokens = Vec::with_capacity(documents.len());
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc);
            doc_lengths.push(tokens.len() as f64);

            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            let distinct: HashSet<&String> = counts.keys().collect();
            for token in distinct {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
            doc_tokens.push(counts);
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<f64>() / doc_lengths.len() as f64
        };

        Self {
            doc_tokens,
            doc_lengths,
            avg_doc_length,
            doc_freq,
        }
    }

    /// Number of documents in the pool.
    pub fn len(&self) -> usize {
        self.doc_tokens.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.doc_tokens.is_empty()
    }

    /// BM25 score of `query_tokens` against document `index`.
    pub fn score(&self, query_tokens: &[String], index: usize) -> f64 {
        let Some(counts) = self.doc_tokens.get(index) else {
            return 0.0;
        };
        let n = self.doc_tokens.len() as f64;
        let doc_len = self.doc_lengths[index];
        let mut score = 0.0;

        for token in query_tokens {
            let tf = f64::from(*counts.get(token).unwrap_or(&0));
            if tf == 0.0 {
                continue;
            }
            let df = f64::from(*self.doc_freq.get(token).unwrap_or(&0));
            // Standard BM25 idf with +1 smoothing to keep it positive.
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_length.max(1.0));
            score += idf * tf * (K1 + 1.0) / denom;
        }

        score
    }

    /// Score every document and min-max normalise into [0, 1].
    ///
    /// A pool with uniform scores (including all-zero) normalises to 0.
    pub fn normalized_scores(&self, query: &str) -> Vec<f64> {
        let query_tokens = tokenize(query);
        let raw: Vec<f64> = (0..self.len())
            .map(|i| self.score(&query_tokens, i))
            .collect();

        let max = raw.iter().cloned().fold(f64::MIN, f64::max);
        let min = raw.iter().cloned().fold(f64::MAX, f64::min);
        if raw.is_empty() || (max - min).abs() < f64::EPSILON {
            return vec![0.0; raw.len()];
        }
        raw.iter().map(|s| (s - min) / (max - min)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_identifiers() {
        let tokens = tokenize("def get_user(user_id): return self.db.find(user_id)");
        assert!(tokens.contains(&"get_user".to_string()));
        assert!(tokens.contains(&"user_id".to_string()));
        assert!(tokens.contains(&"db".to_string()));
    }

    #[test]
    fn test_tokenize_drops_stopwords() {
        let tokens = tokenize("what is the purpose of this function");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(tokens.contains(&"purpose".to_string()));
        assert!(tokens.contains(&"function".to_string()));
    }

    #[test]
    fn test_exact_identifier_outranks_unrelated() {
        let docs = [
            "def parse_config(path): return toml.load(path)",
            "def render_widget(canvas): canvas.draw()",
            "class ConfigLoader: pass",
        ];
        let bm25 = Bm25::new(&docs.iter().map(|s| *s).collect::<Vec<_>>());
        let scores = bm25.normalized_scores("parse_config");
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
        assert_eq!(scores[0], 1.0);
    }

    #[test]
    fn test_uniform_pool_normalises_to_zero() {
        let docs = ["same text here", "same text here"];
        let bm25 = Bm25::new(&docs.iter().map(|s| *s).collect::<Vec<_>>());
        let scores = bm25.normalized_scores("unrelated query");
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_empty_pool() {
        let bm25 = Bm25::new(&[]);
        assert!(bm25.is_empty());
        assert!(bm25.normalized_scores("anything").is_empty());
    }
}
