use crate::index::posting::Posting;

/// Scorer trait
pub trait Scorer: Send + Sync {
    fn score(&self, posting: &Posting, term: &TermStats, field: &FieldStats) -> f32;

    fn name(&self) -> &str;
}

/// Collection-wide statistics of one term
#[derive(Debug, Clone, Copy)]
pub struct TermStats {
    pub doc_freq: u64,     // Documents containing the term, deleted ones included
    pub total_docs: u64,   // Documents in the snapshot
}

impl TermStats {
    /// BM25 inverse document frequency, always positive.
    pub fn idf(&self) -> f32 {
        let n = self.total_docs as f32;
        let df = self.doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

/// Collection-wide statistics of one field
#[derive(Debug, Clone, Copy)]
pub struct FieldStats {
    pub avg_field_len: f32,
}

/// BM25 Scorer
pub struct BM25Scorer {
    pub k1: f32,  // Term frequency saturation (default: 1.2)
    pub b: f32,   // Length normalization strength (default: 0.75)
}

impl Default for BM25Scorer {
    fn default() -> Self {
        BM25Scorer {
            k1: 1.2,
            b: 0.75,
        }
    }
}

impl Scorer for BM25Scorer {
    fn score(&self, posting: &Posting, term: &TermStats, field: &FieldStats) -> f32 {
        let tf = posting.term_freq as f32;
        let field_len = posting.field_len as f32;
        let avg_len = if field.avg_field_len > 0.0 { field.avg_field_len } else { 1.0 };

        // BM25 formula
        let numerator = term.idf() * tf * (self.k1 + 1.0);
        let denominator = tf + self.k1 * (1.0 - self.b + self.b * (field_len / avg_len));

        numerator / denominator
    }

    fn name(&self) -> &str {
        "bm25"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarer_terms_and_shorter_fields_score_higher() {
        let scorer = BM25Scorer::default();
        let field = FieldStats { avg_field_len: 10.0 };
        let posting = Posting { doc: 0, term_freq: 1, field_len: 10 };

        let rare = scorer.score(&posting, &TermStats { doc_freq: 1, total_docs: 100 }, &field);
        let common = scorer.score(&posting, &TermStats { doc_freq: 90, total_docs: 100 }, &field);
        assert!(rare > common);
        assert!(common > 0.0);

        let short = Posting { field_len: 2, ..posting };
        let stats = TermStats { doc_freq: 5, total_docs: 100 };
        assert!(scorer.score(&short, &stats, &field) > scorer.score(&posting, &stats, &field));
    }
}
