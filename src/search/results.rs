use std::cmp::Ordering;
use serde::{Serialize, Deserialize};
use crate::index::reader::DocAddress;

/// Order results by a stored field instead of relevance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub reverse: bool,
}

impl Sort {
    pub fn by(field: &str) -> Self {
        Sort { field: field.to_string(), reverse: false }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }
}

/// One page of a search: entity ids in result order plus the full hit count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub scores: Vec<f32>,
    pub total: usize,
}

/// Document with relevance score
#[derive(Debug, Clone, Copy)]
pub struct ScoredDocument {
    pub address: DocAddress,
    pub score: f32,
}

impl ScoredDocument {
    /// Relevance order: higher score first, then index order.
    pub fn by_relevance(a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
        b.score.total_cmp(&a.score).then(a.address.cmp(&b.address))
    }
}
