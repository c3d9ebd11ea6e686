use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entity;
use crate::index::document::AnalyzedDocument;

/// Parallel document analyzer for bulk (re)indexing
pub struct ParallelIndexer {
    pub workers: usize,
    pub progress: Arc<AtomicUsize>,
    pool: rayon::ThreadPool,
}

impl ParallelIndexer {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("chunkdex-analyze-{}", i))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, format!("analysis pool: {}", e)))?;

        Ok(ParallelIndexer {
            workers,
            progress: Arc::new(AtomicUsize::new(0)),
            pool,
        })
    }

    /// Documents analyzed since the last reset
    pub fn get_progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn reset_progress(&self) {
        self.progress.store(0, Ordering::Relaxed);
    }

    /// Analyze a batch in parallel, preserving input order.
    pub fn analyze_batch(&self, entities: &[Entity], analyzers: &AnalyzerRegistry) -> Result<Vec<AnalyzedDocument>> {
        self.pool.install(|| {
            entities.par_iter()
                .map(|entity| {
                    let document = AnalyzedDocument::from_entity(entity, analyzers);
                    self.progress.fetch_add(1, Ordering::Relaxed);
                    document
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldDescriptor;

    #[test]
    fn keeps_order_and_counts_progress() {
        let indexer = ParallelIndexer::new(4).unwrap();
        let entities: Vec<Entity> = (0..200)
            .map(|i| Entity::new("Article", &i.to_string())
                .with_field(FieldDescriptor::text("title", format!("document number {}", i))))
            .collect();

        let documents = indexer.analyze_batch(&entities, &AnalyzerRegistry::new()).unwrap();
        assert_eq!(documents.len(), 200);
        assert!(documents.iter().enumerate().all(|(i, d)| d.stored.id == i.to_string()));
        assert_eq!(indexer.get_progress(), 200);
    }
}
