use serde::{Serialize, Deserialize};

/// One document's occurrence of a term within a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,          // Segment-local doc ordinal
    pub term_freq: u32,    // Term frequency in the field
    pub field_len: u32,    // Tokens in the field, for length normalization
}

/// Posting list for a term
/// Note: Sorted by doc for linear intersection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList {
            postings: Vec::new(),
        }
    }

    pub fn add_posting(&mut self, posting: Posting) {
        // Docs are usually appended in ordinal order
        if self.postings.last().is_none_or(|last| last.doc < posting.doc) {
            self.postings.push(posting);
            return;
        }
        match self.postings.binary_search_by_key(&posting.doc, |p| p.doc) {
            Ok(pos) => self.postings[pos] = posting,
            Err(pos) => self.postings.insert(pos, posting),
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn doc_freq(&self) -> u32 {
        self.postings.len() as u32
    }

    pub fn get(&self, doc: u32) -> Option<&Posting> {
        self.postings.binary_search_by_key(&doc, |p| p.doc)
            .ok()
            .map(|pos| &self.postings[pos])
    }

    /// Intersect two posting lists (simple linear merge)
    pub fn intersect(&self, other: &PostingList) -> Vec<u32> {
        let mut result = Vec::new();
        let mut i = 0;
        let mut j = 0;

        while i < self.postings.len() && j < other.postings.len() {
            let doc1 = self.postings[i].doc;
            let doc2 = other.postings[j].doc;

            if doc1 == doc2 {
                result.push(doc1);
                i += 1;
                j += 1;
            } else if doc1 < doc2 {
                i += 1;
            } else {
                j += 1;
            }
        }

        result
    }
}
