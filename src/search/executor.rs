use std::cmp::Ordering;
use std::collections::HashMap;
use crate::analysis::analyzer::STANDARD;
use crate::core::error::{Error, ErrorKind, Result};
use crate::index::inverted::{wildcard_regex, Term};
use crate::index::posting::PostingList;
use crate::index::reader::{DocAddress, IndexReader, SegmentReader};
use crate::query::ast::{BoolQuery, PrefixQuery, Query, TermQuery, WildcardQuery};
use crate::scoring::scorer::{BM25Scorer, FieldStats, Scorer, TermStats};
use crate::search::results::{ScoredDocument, SearchPage, Sort};

/// Segment-local doc ordinal -> score
type DocScores = HashMap<u32, f32>;

/// Evaluates queries against one reader snapshot
pub struct QueryExecutor<'a> {
    pub reader: &'a IndexReader,
    pub scorer: Box<dyn Scorer>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(reader: &'a IndexReader) -> Self {
        QueryExecutor {
            reader,
            scorer: Box::new(BM25Scorer::default()),
        }
    }

    pub fn search(&self, query: &Query, sort: Option<&Sort>, page_number: usize, page_size: usize) -> Result<SearchPage> {
        if page_number == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument, "page_number starts at 1"));
        }

        let mut hits = self.execute(query)?;
        let total = hits.len();

        match sort {
            Some(sort) => hits.sort_by(|a, b| self.by_field(sort, a, b)),
            None => hits.sort_by(ScoredDocument::by_relevance),
        }

        let start = (page_number - 1).saturating_mul(page_size);
        let mut page = SearchPage { total, ..SearchPage::default() };
        for hit in hits.iter().skip(start).take(page_size) {
            if let Some(doc) = self.reader.document(hit.address) {
                page.ids.push(doc.id.clone());
                page.scores.push(hit.score);
            }
        }
        Ok(page)
    }

    /// Every live match with its score, in no particular order.
    pub fn execute(&self, query: &Query) -> Result<Vec<ScoredDocument>> {
        let mut hits = Vec::new();
        for (index, segment) in self.reader.segments().iter().enumerate() {
            for (doc, score) in self.evaluate(segment, query)? {
                if segment.is_live(doc) {
                    hits.push(ScoredDocument {
                        address: DocAddress { segment: index as u32, doc },
                        score,
                    });
                }
            }
        }
        Ok(hits)
    }

    fn evaluate(&self, segment: &SegmentReader, query: &Query) -> Result<DocScores> {
        match query {
            Query::MatchAll => Ok((0..segment.data.doc_count()).map(|doc| (doc, 1.0)).collect()),
            Query::Term(tq) => self.execute_term(segment, tq),
            Query::Bool(bq) => self.execute_bool(segment, bq),
            Query::Prefix(pq) => Ok(self.execute_prefix(segment, pq)),
            Query::Wildcard(wq) => self.execute_wildcard(segment, wq),
        }
    }

    fn score_postings(&self, term: &Term, list: &PostingList) -> DocScores {
        let term_stats = TermStats {
            doc_freq: self.reader.doc_freq(term),
            total_docs: self.reader.max_doc(),
        };
        let field_stats = FieldStats { avg_field_len: self.reader.avg_field_len(&term.field) };

        list.postings.iter()
            .map(|posting| (posting.doc, self.scorer.score(posting, &term_stats, &field_stats)))
            .collect()
    }

    fn execute_term(&self, segment: &SegmentReader, query: &TermQuery) -> Result<DocScores> {
        let index = &segment.data.index;

        // Exact match serves keyword fields
        let exact_term = Term::new(&query.field, &query.value);
        let mut scores = index.search_term(&exact_term)
            .map(|list| self.score_postings(&exact_term, list))
            .unwrap_or_default();

        // Analyzed match serves tokenized fields: every token required
        let tokens = self.reader.analyzers().analyze(STANDARD, &query.value)?;
        if !(tokens.len() == 1 && tokens[0].text == query.value) {
            let mut analyzed: Option<DocScores> = None;
            for token in &tokens {
                let term = Term::new(&query.field, &token.text);
                let token_scores = index.search_term(&term)
                    .map(|list| self.score_postings(&term, list))
                    .unwrap_or_default();

                analyzed = Some(match analyzed {
                    None => token_scores,
                    Some(mut acc) => {
                        acc.retain(|doc, _| token_scores.contains_key(doc));
                        for (doc, score) in acc.iter_mut() {
                            *score += token_scores[doc];
                        }
                        acc
                    }
                });
            }

            for (doc, score) in analyzed.unwrap_or_default() {
                let entry = scores.entry(doc).or_insert(0.0);
                *entry = entry.max(score);
            }
        }

        Ok(boosted(scores, query.boost))
    }

    fn execute_bool(&self, segment: &SegmentReader, query: &BoolQuery) -> Result<DocScores> {
        let mut must: Option<DocScores> = None;
        for clause in &query.must {
            let clause_scores = self.evaluate(segment, clause)?;
            must = Some(match must {
                None => clause_scores,
                Some(mut acc) => {
                    acc.retain(|doc, _| clause_scores.contains_key(doc));
                    for (doc, score) in acc.iter_mut() {
                        *score += clause_scores[doc];
                    }
                    acc
                }
            });
        }

        let mut should = DocScores::new();
        for clause in &query.should {
            for (doc, score) in self.evaluate(segment, clause)? {
                *should.entry(doc).or_insert(0.0) += score;
            }
        }

        // Combine: (must, scored up by should) or should alone; pure negation starts from all docs
        let mut scores = match must {
            Some(mut must) => {
                for (doc, score) in must.iter_mut() {
                    *score += should.get(doc).copied().unwrap_or(0.0);
                }
                must
            }
            None if !query.should.is_empty() => should,
            None if !query.must_not.is_empty() => (0..segment.data.doc_count()).map(|doc| (doc, 1.0)).collect(),
            None => DocScores::new(),
        };

        for clause in &query.must_not {
            for doc in self.evaluate(segment, clause)?.keys() {
                scores.remove(doc);
            }
        }

        Ok(boosted(scores, query.boost))
    }

    fn execute_prefix(&self, segment: &SegmentReader, query: &PrefixQuery) -> DocScores {
        let index = &segment.data.index;
        let lowered = query.prefix.to_lowercase();

        // Constant score over every expanded term
        let mut scores = DocScores::new();
        let mut expand = |prefix: &str| {
            for (_, list) in index.prefix_terms(&query.field, prefix) {
                for posting in &list.postings {
                    scores.insert(posting.doc, 1.0);
                }
            }
        };
        expand(&query.prefix);
        if lowered != query.prefix {
            expand(&lowered);
        }

        boosted(scores, query.boost)
    }

    fn execute_wildcard(&self, segment: &SegmentReader, query: &WildcardQuery) -> Result<DocScores> {
        let index = &segment.data.index;
        let mut scores = DocScores::new();

        let mut patterns = vec![query.pattern.clone()];
        let lowered = query.pattern.to_lowercase();
        if lowered != query.pattern {
            patterns.push(lowered);
        }

        for pattern in patterns {
            let regex = wildcard_regex(&pattern)
                .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("Invalid wildcard: {}", e)))?;
            for (_, list) in index.matching_terms(&query.field, &regex) {
                for posting in &list.postings {
                    scores.insert(posting.doc, 1.0);
                }
            }
        }

        Ok(boosted(scores, query.boost))
    }

    fn by_field(&self, sort: &Sort, a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
        let value_a = self.reader.document(a.address).and_then(|d| d.sort_value(&sort.field));
        let value_b = self.reader.document(b.address).and_then(|d| d.sort_value(&sort.field));

        // Documents without the field go last in either direction
        let by_value = match (&value_a, &value_b) {
            (Some(x), Some(y)) if sort.reverse => y.sort_cmp(x),
            (Some(x), Some(y)) => x.sort_cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_value.then_with(|| ScoredDocument::by_relevance(a, b))
    }
}

fn boosted(mut scores: DocScores, boost: Option<f32>) -> DocScores {
    if let Some(boost) = boost {
        for score in scores.values_mut() {
            *score *= boost;
        }
    }
    scores
}
