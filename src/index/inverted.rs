use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use regex::Regex;
use serde::{Serialize, Deserialize};
use crate::index::document::AnalyzedDocument;
use crate::index::posting::{Posting, PostingList};

/// Term representation: a field name and the indexed text
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    pub field: String,
    pub text: String,
}

impl Term {
    pub fn new(field: &str, text: &str) -> Self {
        Term {
            field: field.to_string(),
            text: text.to_string(),
        }
    }
}

/// Inverted index of one segment.
///
/// Terms are kept ordered by (field, text) so prefix lookups are a range scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub postings: BTreeMap<Term, PostingList>,
    pub doc_count: u32,
    // Total tokens per field across the segment
    pub field_tokens: HashMap<String, u64>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, doc: u32, document: &AnalyzedDocument) {
        for field in &document.fields {
            let mut term_freqs: HashMap<&str, u32> = HashMap::new();
            for term in &field.terms {
                *term_freqs.entry(term.as_str()).or_insert(0) += 1;
            }

            let field_len = field.terms.len() as u32;
            for (text, term_freq) in term_freqs {
                self.postings.entry(Term::new(&field.name, text))
                    .or_default()
                    .add_posting(Posting { doc, term_freq, field_len });
            }
            *self.field_tokens.entry(field.name.clone()).or_insert(0) += field_len as u64;
        }

        self.doc_count = self.doc_count.max(doc + 1);
    }

    pub fn search_term(&self, term: &Term) -> Option<&PostingList> {
        self.postings.get(term)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Terms of `field` whose text starts with `prefix`.
    pub fn prefix_terms<'a>(&'a self, field: &'a str, prefix: &'a str) -> impl Iterator<Item = (&'a Term, &'a PostingList)> + 'a {
        let start = Term::new(field, prefix);
        self.postings.range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(term, _)| term.field == field && term.text.starts_with(prefix))
    }

    /// Terms of `field` fully matched by `pattern`.
    pub fn matching_terms<'a>(&'a self, field: &'a str, pattern: &'a Regex) -> impl Iterator<Item = (&'a Term, &'a PostingList)> + 'a {
        self.prefix_terms(field, "")
            .filter(move |(term, _)| pattern.is_match(&term.text))
    }
}

/// Wildcard pattern (`*` any run, `?` one char) to an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut regex_pattern = String::with_capacity(pattern.len() + 8);
    regex_pattern.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern)
}
