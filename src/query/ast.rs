use serde::{Serialize, Deserialize};

/// Main query enum representing all query types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Term(TermQuery),         // Single term search
    Bool(BoolQuery),         // Boolean combinations
    Prefix(PrefixQuery),
    Wildcard(WildcardQuery), // Pattern matching over the term dictionary
    MatchAll,                // Match all documents
}

/// Single term query. The value matches exactly or through the standard
/// analyzer, so it works on keyword and tokenized fields alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    pub field: String,
    pub value: String,
    pub boost: Option<f32>,
}

/// Boolean query with must/should/must_not clauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<Query>,      // All must match (AND)
    pub should: Vec<Query>,    // At least one must match (OR) when there is no must
    pub must_not: Vec<Query>,  // None must match (NOT)
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixQuery {
    pub field: String,
    pub prefix: String,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildcardQuery {
    pub field: String,
    pub pattern: String, // Pattern with wildcards (* and ?)
    pub boost: Option<f32>,
}

impl Query {
    pub fn term(field: &str, value: &str) -> Self {
        Query::Term(TermQuery { field: field.to_string(), value: value.to_string(), boost: None })
    }

    pub fn prefix(field: &str, prefix: &str) -> Self {
        Query::Prefix(PrefixQuery { field: field.to_string(), prefix: prefix.to_string(), boost: None })
    }

    pub fn wildcard(field: &str, pattern: &str) -> Self {
        Query::Wildcard(WildcardQuery { field: field.to_string(), pattern: pattern.to_string(), boost: None })
    }

    pub fn with_boost(self, boost: f32) -> Self {
        match self {
            Query::Term(q) => Query::Term(TermQuery { boost: Some(boost), ..q }),
            Query::Bool(q) => Query::Bool(BoolQuery { boost: Some(boost), ..q }),
            Query::Prefix(q) => Query::Prefix(PrefixQuery { boost: Some(boost), ..q }),
            Query::Wildcard(q) => Query::Wildcard(WildcardQuery { boost: Some(boost), ..q }),
            Query::MatchAll => Query::MatchAll,
        }
    }
}

impl BoolQuery {
    pub fn new() -> Self {
        BoolQuery {
            must: Vec::new(),
            should: Vec::new(),
            must_not: Vec::new(),
            boost: None,
        }
    }

    pub fn with_must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn with_should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn with_must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }
}

impl Default for BoolQuery {
    fn default() -> Self {
        Self::new()
    }
}
