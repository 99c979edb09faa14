//! Ranking engine error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RankingError {
    /// `search` was called before any `build_index`.
    #[error("search index is empty: build_index has not been called")]
    IndexEmpty,

    /// A strategy name did not match any known ranker.
    #[error("unknown ranking strategy '{name}' (expected 'bm25' or 'lexical')")]
    UnknownStrategy { name: String },
}
