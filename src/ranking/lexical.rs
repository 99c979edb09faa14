//! Field-weighted lexical ranking.
//!
//! Scoring per tool:
//!
//! 1. Every (query token, field) pair gets a match quality: the token (or
//!    the whole query) equals the field value, the token is one of the
//!    field's words, or the token appears inside the field text.
//! 2. Within a field, matches are sorted best first and decayed
//!    harmonically (1, ½, ⅓, …), so a long field cannot pile up score by
//!    repeating words.
//! 3. The field total is log-dampened, harder for prose fields than for
//!    identifiers, then multiplied by the field weight.
//! 4. The sum over fields is multiplied by a bonus that grows with the
//!    square root of the number of distinct field kinds that matched.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::errors::RankingError;
use super::text::{normalize, tokenize};
use super::{top_k, FieldKind, RankingStrategy, ScoredTool, ToolEntry, ToolRanker};

const EXACT: f64 = 1.0;
const WHOLE_WORD: f64 = 0.7;
const SUBSTRING: f64 = 0.3;

/// Dampening constant for description and parameter text.
const FREE_TEXT_K: f64 = 1.0;
/// Dampening constant for service, operation, tag and path.
const IDENTIFIER_K: f64 = 0.25;

const DIVERSITY_FACTOR: f64 = 0.25;

#[derive(Debug)]
struct IndexedField {
    kind: FieldKind,
    weight: f64,
    /// Normalized value, words separated by single spaces.
    text: String,
    words: HashSet<String>,
}

#[derive(Debug)]
struct IndexedTool {
    doc_id: String,
    fields: Vec<IndexedField>,
}

#[derive(Debug, Default)]
struct LexicalIndex {
    tools: Vec<IndexedTool>,
}

impl LexicalIndex {
    fn build(entries: Vec<ToolEntry>) -> Self {
        let tools = entries
            .into_iter()
            .map(|entry| IndexedTool {
                doc_id: entry.doc_id,
                fields: entry
                    .fields
                    .into_iter()
                    .filter_map(|field| {
                        let text = normalize(&field.value);
                        if text.is_empty() {
                            return None;
                        }
                        let words = text.split(' ').map(str::to_string).collect();
                        Some(IndexedField {
                            kind: field.kind,
                            weight: field.weight,
                            text,
                            words,
                        })
                    })
                    .collect(),
            })
            .collect();
        Self { tools }
    }

    fn score(&self, query: &str, limit: usize) -> Vec<ScoredTool> {
        let query_text = normalize(query);
        let tokens: Vec<String> = {
            let mut seen = HashSet::new();
            tokenize(query)
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect()
        };
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for tool in &self.tools {
            let mut total = 0.0;
            let mut kinds: BTreeSet<FieldKind> = BTreeSet::new();

            for field in &tool.fields {
                let whole_query = field.text == query_text;
                let mut qualities: Vec<f64> = tokens
                    .iter()
                    .filter_map(|token| match_quality(field, token, whole_query))
                    .collect();
                if qualities.is_empty() {
                    continue;
                }

                qualities.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                let decayed = harmonic_sum(&qualities);
                total += dampen(decayed, field.kind) * field.weight;
                kinds.insert(field.kind);
            }

            if total > 0.0 {
                scores.insert(tool.doc_id.as_str(), total * diversity_bonus(kinds.len()));
            }
        }

        top_k(scores, limit)
    }
}

/// Quality of one token against one field, if it matches at all.
fn match_quality(field: &IndexedField, token: &str, whole_query: bool) -> Option<f64> {
    if field.text == token {
        Some(EXACT)
    } else if field.words.contains(token) {
        Some(if whole_query { EXACT } else { WHOLE_WORD })
    } else if field.text.contains(token) {
        Some(SUBSTRING)
    } else {
        None
    }
}

/// `q₀ + q₁/2 + q₂/3 + …` over qualities sorted best first.
fn harmonic_sum(sorted: &[f64]) -> f64 {
    sorted
        .iter()
        .enumerate()
        .map(|(i, q)| q / (i as f64 + 1.0))
        .sum()
}

/// `ln(1 + x·k) / k`; a larger `k` flattens the curve sooner.
fn dampen(total: f64, kind: FieldKind) -> f64 {
    let k = if kind.is_free_text() {
        FREE_TEXT_K
    } else {
        IDENTIFIER_K
    };
    (1.0 + total * k).ln() / k
}

/// `1 + 0.25 · (√kinds − 1)`.
fn diversity_bonus(kinds: usize) -> f64 {
    if kinds == 0 {
        return 1.0;
    }
    1.0 + DIVERSITY_FACTOR * ((kinds as f64).sqrt() - 1.0)
}

/// Lexical ranker over weighted fields.
#[derive(Debug, Default)]
pub struct LexicalRanker {
    index: Option<Arc<LexicalIndex>>,
}

impl LexicalRanker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolRanker for LexicalRanker {
    fn build_index(&mut self, entries: Vec<ToolEntry>) {
        let index = LexicalIndex::build(entries);
        tracing::debug!(tools = index.tools.len(), "built lexical index");
        self.index = Some(Arc::new(index));
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredTool>, RankingError> {
        let index = self.index.as_ref().ok_or(RankingError::IndexEmpty)?;
        Ok(index.score(query, top_k))
    }

    fn len(&self) -> usize {
        self.index.as_ref().map_or(0, |i| i.tools.len())
    }

    fn strategy(&self) -> RankingStrategy {
        RankingStrategy::Lexical
    }
}
