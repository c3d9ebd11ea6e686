use std::sync::Arc;
use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::Result;
use crate::index::commit::SegmentMeta;
use crate::index::document::StoredDocument;
use crate::index::inverted::Term;
use crate::index::segment::SegmentData;
use crate::query::ast::Query;
use crate::search::executor::QueryExecutor;
use crate::search::results::{SearchPage, Sort};

/// Position of a document inside a reader snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocAddress {
    pub segment: u32,
    pub doc: u32,
}

/// One segment as seen by a snapshot: shared data plus the deletes at open time.
#[derive(Clone)]
pub struct SegmentReader {
    pub meta: SegmentMeta,
    pub data: Arc<SegmentData>,
    pub deleted: Arc<RoaringBitmap>,
}

impl SegmentReader {
    pub fn is_live(&self, doc: u32) -> bool {
        !self.deleted.contains(doc)
    }

    pub fn live_docs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.data.doc_count()).filter(|doc| self.is_live(*doc))
    }

    pub fn num_docs(&self) -> u64 {
        self.data.doc_count() as u64 - self.deleted.len()
    }
}

/// Immutable point-in-time view of an index.
///
/// Holders keep their snapshot valid for as long as they like; a reopen
/// builds a new reader instead of changing this one.
pub struct IndexReader {
    name: String,
    version: u64,
    segments: Vec<SegmentReader>,
    analyzers: Arc<AnalyzerRegistry>,
    opened_at: DateTime<Utc>,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("segments", &self.segments.len())
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl IndexReader {
    pub fn new(name: &str, version: u64, segments: Vec<SegmentReader>, analyzers: Arc<AnalyzerRegistry>) -> Self {
        IndexReader {
            name: name.to_string(),
            version,
            segments,
            analyzers,
            opened_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writer change counter at the time this snapshot was taken.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn segments(&self) -> &[SegmentReader] {
        &self.segments
    }

    pub fn analyzers(&self) -> &AnalyzerRegistry {
        &self.analyzers
    }

    /// Live documents.
    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(SegmentReader::num_docs).sum()
    }

    /// Documents including deleted ones; the population scoring is based on.
    pub fn max_doc(&self) -> u64 {
        self.segments.iter().map(|s| s.data.doc_count() as u64).sum()
    }

    pub fn document(&self, address: DocAddress) -> Option<&StoredDocument> {
        let segment = self.segments.get(address.segment as usize)?;
        if !segment.is_live(address.doc) {
            return None;
        }
        segment.data.documents.get(address.doc as usize)
    }

    /// Live document stored under (type, id).
    pub fn find(&self, entity_type: &str, id: &str) -> Option<&StoredDocument> {
        self.segments.iter().find_map(|segment| {
            segment.data.docs_for_key(entity_type, id)
                .into_iter()
                .find(|doc| segment.is_live(*doc))
                .map(|doc| &segment.data.documents[doc as usize])
        })
    }

    pub fn doc_freq(&self, term: &Term) -> u64 {
        self.segments.iter()
            .filter_map(|s| s.data.index.search_term(term))
            .map(|list| list.doc_freq() as u64)
            .sum()
    }

    pub fn avg_field_len(&self, field: &str) -> f32 {
        let tokens: u64 = self.segments.iter()
            .filter_map(|s| s.data.index.field_tokens.get(field))
            .sum();
        let docs = self.max_doc();
        if docs == 0 { 0.0 } else { tokens as f32 / docs as f32 }
    }

    /// Runs `query` and returns page `page_number` (1-based) of `page_size` ids.
    pub fn search(&self, query: &Query, sort: Option<&Sort>, page_number: usize, page_size: usize) -> Result<SearchPage> {
        QueryExecutor::new(self).search(query, sort, page_number, page_size)
    }
}
