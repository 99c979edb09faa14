//! Weighted BM25+ ranking.
//!
//! Each field of each tool is indexed as its own pseudo-document. A query is
//! scored against every field with BM25+, each field score is multiplied by
//! the field's weight, and the results are summed per tool.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::errors::RankingError;
use super::text::stemmed_tokens;
use super::{top_k, RankingStrategy, ScoredTool, ToolEntry, ToolRanker};

/// BM25+ parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization strength.
    pub b: f64,
    /// Floor added for every term present in a field.
    pub delta: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            delta: 1.0,
        }
    }
}

/// One indexed field.
#[derive(Debug)]
struct FieldDoc {
    /// Index into `Bm25Index::doc_ids`.
    owner: usize,
    weight: f64,
    len: usize,
}

#[derive(Debug, Default)]
struct Bm25Index {
    doc_ids: Vec<String>,
    fields: Vec<FieldDoc>,
    /// term → (field index, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    avg_len: f64,
}

impl Bm25Index {
    fn build(entries: Vec<ToolEntry>) -> Self {
        let mut index = Bm25Index::default();
        let mut total_len = 0usize;

        for entry in entries {
            let owner = index.doc_ids.len();
            index.doc_ids.push(entry.doc_id);

            for field in entry.fields {
                let tokens = stemmed_tokens(&field.value);
                if tokens.is_empty() {
                    continue;
                }
                let field_idx = index.fields.len();

                let mut tf: HashMap<String, u32> = HashMap::new();
                for token in &tokens {
                    *tf.entry(token.clone()).or_insert(0) += 1;
                }
                for (term, count) in tf {
                    index.postings.entry(term).or_default().push((field_idx, count));
                }

                total_len += tokens.len();
                index.fields.push(FieldDoc {
                    owner,
                    weight: field.weight,
                    len: tokens.len(),
                });
            }
        }

        if !index.fields.is_empty() {
            index.avg_len = total_len as f64 / index.fields.len() as f64;
        }
        index
    }

    /// `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive.
    fn idf(&self, df: usize) -> f64 {
        let n = self.fields.len() as f64;
        let df = df as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, query: &str, params: &Bm25Params, limit: usize) -> Vec<ScoredTool> {
        let terms: BTreeSet<String> = stemmed_tokens(query).into_iter().collect();
        let mut scores: HashMap<&str, f64> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());

            for &(field_idx, tf) in postings {
                let field = &self.fields[field_idx];
                let tf = f64::from(tf);
                let norm = 1.0 - params.b + params.b * field.len as f64 / self.avg_len;
                let term_score =
                    idf * (tf * (params.k1 + 1.0) / (tf + params.k1 * norm) + params.delta);

                let doc_id = self.doc_ids[field.owner].as_str();
                *scores.entry(doc_id).or_insert(0.0) += term_score * field.weight;
            }
        }

        top_k(scores, limit)
    }
}

/// BM25+ ranker over weighted fields.
#[derive(Debug, Default)]
pub struct Bm25Ranker {
    params: Bm25Params,
    index: Option<Arc<Bm25Index>>,
}

impl Bm25Ranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: Bm25Params) -> Self {
        Self {
            params,
            index: None,
        }
    }
}

impl ToolRanker for Bm25Ranker {
    fn build_index(&mut self, entries: Vec<ToolEntry>) {
        let index = Bm25Index::build(entries);
        tracing::debug!(
            tools = index.doc_ids.len(),
            fields = index.fields.len(),
            terms = index.postings.len(),
            "built bm25 index"
        );
        self.index = Some(Arc::new(index));
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredTool>, RankingError> {
        let index = self.index.as_ref().ok_or(RankingError::IndexEmpty)?;
        Ok(index.score(query, &self.params, top_k))
    }

    fn len(&self) -> usize {
        self.index.as_ref().map_or(0, |i| i.doc_ids.len())
    }

    fn strategy(&self) -> RankingStrategy {
        RankingStrategy::Bm25
    }
}
