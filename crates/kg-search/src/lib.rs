//! Hybrid search fusion (C13): combine ranked lists from multiple
//! searchers into one deduplicated, score-sorted list.

mod error;
mod fusion;
mod types;

pub use error::SearchError;
pub use fusion::{reciprocal_rank_fusion, weighted_average, DEFAULT_RRF_K};
pub use types::{RankedList, ScoreKind, SearchHit};
