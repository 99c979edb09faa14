//! Tool ranking engine.
//!
//! Every tool becomes a [`ToolEntry`]: a document id plus weighted fields
//! (service, operation, description, …). A [`ToolRanker`] indexes a full set
//! of entries and answers top-k queries. Two strategies are available:
//!
//! - [`Bm25Ranker`]: weighted BM25+ with every field scored as its own
//!   pseudo-document.
//! - [`LexicalRanker`]: match-quality scoring with per-field harmonic decay,
//!   log dampening and a diversity bonus.
//!
//! Indexes are immutable once built; a changed catalog means a full rebuild.

pub mod bm25;
pub mod catalog;
pub mod errors;
pub mod lexical;
pub mod text;

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use bm25::Bm25Ranker;
pub use catalog::{doc_id, entries_for, split_doc_id, tool_entry, FieldWeights};
pub use errors::RankingError;
pub use lexical::LexicalRanker;

// ─── Entries ────────────────────────────────────────────────────────────────

/// Role of a field within a tool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Service,
    Operation,
    Description,
    Tag,
    Path,
    ParamDesc,
}

impl FieldKind {
    pub fn key(&self) -> &'static str {
        match self {
            FieldKind::Service => "service",
            FieldKind::Operation => "operation",
            FieldKind::Description => "description",
            FieldKind::Tag => "tag",
            FieldKind::Path => "path",
            FieldKind::ParamDesc => "param_desc",
        }
    }

    /// Prose fields, as opposed to short identifiers.
    pub fn is_free_text(&self) -> bool {
        matches!(self, FieldKind::Description | FieldKind::ParamDesc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolField {
    pub kind: FieldKind,
    pub value: String,
    pub weight: f64,
}

/// Ranking input for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub doc_id: String,
    pub fields: Vec<ToolField>,
}

impl ToolEntry {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field. Blank values are ignored.
    pub fn field(mut self, kind: FieldKind, value: impl Into<String>, weight: f64) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.fields.push(ToolField {
                kind,
                value,
                weight,
            });
        }
        self
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTool {
    pub score: f64,
    pub doc_id: String,
}

// ─── Ranker Contract ────────────────────────────────────────────────────────

pub trait ToolRanker: Send + Sync {
    /// Replace the index with one built from `entries`.
    fn build_index(&mut self, entries: Vec<ToolEntry>);

    /// Top `top_k` tools for `query`, best first. Ties are ordered by
    /// doc id; tools scoring zero are omitted.
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredTool>, RankingError>;

    /// Number of indexed tools.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn strategy(&self) -> RankingStrategy;
}

/// Which ranker to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingStrategy {
    #[default]
    Bm25,
    Lexical,
}

impl FromStr for RankingStrategy {
    type Err = RankingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bm25" => Ok(RankingStrategy::Bm25),
            "lexical" => Ok(RankingStrategy::Lexical),
            other => Err(RankingError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RankingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankingStrategy::Bm25 => f.write_str("bm25"),
            RankingStrategy::Lexical => f.write_str("lexical"),
        }
    }
}

/// Construct an empty ranker for `strategy`.
pub fn new_ranker(strategy: RankingStrategy) -> Box<dyn ToolRanker> {
    match strategy {
        RankingStrategy::Bm25 => Box::new(Bm25Ranker::new()),
        RankingStrategy::Lexical => Box::new(LexicalRanker::new()),
    }
}

/// Drop non-positive scores, sort best first (doc id breaks ties) and keep
/// `top_k`.
pub(crate) fn top_k(scores: HashMap<&str, f64>, top_k: usize) -> Vec<ScoredTool> {
    let mut hits: Vec<ScoredTool> = scores
        .into_iter()
        .filter(|(_, score)| *score > 0.0 && score.is_finite())
        .map(|(doc_id, score)| ScoredTool {
            score,
            doc_id: doc_id.to_string(),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    hits.truncate(top_k);
    hits
}

// ─── Tests ──────────────────────────────────────────────────────────────────
