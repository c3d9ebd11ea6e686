use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use parking_lot::{Mutex, RwLock};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, ErrorKind, Result};
use crate::directory::provider::Directory;
use crate::directory::virtual_dir::VirtualDirectory;
use crate::index::reader::IndexReader;
use crate::index::writer::IndexWriter;
use crate::storage::chunk_store::ChunkStore;

/// The current reader snapshot of one index and when it was taken.
pub struct SearcherHandle {
    name: String,
    reader: RwLock<Arc<IndexReader>>,
    opened_at: Mutex<Instant>,
    in_flight: AtomicBool,
    // Serializes reopens of this index
    reopen_lock: Mutex<()>,
}

impl SearcherHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The snapshot currently in service.
    pub fn reader(&self) -> Arc<IndexReader> {
        self.reader.read().clone()
    }

    pub fn opened_at(&self) -> Instant {
        *self.opened_at.lock()
    }
}

/// Marks a reopen as in flight; cleared when dropped.
pub struct ReopenGuard {
    handle: Arc<SearcherHandle>,
}

impl ReopenGuard {
    pub fn name(&self) -> &str {
        &self.handle.name
    }
}

impl Drop for ReopenGuard {
    fn drop(&mut self) {
        self.handle.in_flight.store(false, Ordering::Release);
    }
}

/// One writer and one searcher per index name, built on first use.
///
/// Construction is double-checked under a per-name lock, so concurrent
/// callers for the same name share one writer and one directory.
pub struct IndexHandleCache {
    store: Arc<dyn ChunkStore>,
    chunk_size: usize,
    analyzers: Arc<AnalyzerRegistry>,
    force_unlock: bool,
    writers: RwLock<HashMap<String, Arc<IndexWriter>>>,
    searchers: RwLock<HashMap<String, Arc<SearcherHandle>>>,
    writer_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    searcher_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_change: RwLock<HashMap<String, Instant>>,
    directories_built: AtomicUsize,
    closed: AtomicBool,
}

impl IndexHandleCache {
    pub fn new(store: Arc<dyn ChunkStore>, chunk_size: usize, analyzers: Arc<AnalyzerRegistry>) -> Self {
        IndexHandleCache {
            store,
            chunk_size,
            analyzers,
            force_unlock: false,
            writers: RwLock::new(HashMap::new()),
            searchers: RwLock::new(HashMap::new()),
            writer_locks: Mutex::new(HashMap::new()),
            searcher_locks: Mutex::new(HashMap::new()),
            last_change: RwLock::new(HashMap::new()),
            directories_built: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Clear stale write locks before opening each writer.
    pub fn with_force_unlock(mut self, force_unlock: bool) -> Self {
        self.force_unlock = force_unlock;
        self
    }

    pub fn analyzers(&self) -> &Arc<AnalyzerRegistry> {
        &self.analyzers
    }

    /// Directories constructed so far; one per index name.
    pub fn directories_built(&self) -> usize {
        self.directories_built.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::InvalidState, "index handle cache is closed"));
        }
        Ok(())
    }

    fn name_lock(locks: &Mutex<HashMap<String, Arc<Mutex<()>>>>, name: &str) -> Arc<Mutex<()>> {
        locks.lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get_writer(&self, name: &str) -> Result<Arc<IndexWriter>> {
        self.ensure_open()?;
        if let Some(writer) = self.writers.read().get(name) {
            return Ok(writer.clone());
        }

        let lock = Self::name_lock(&self.writer_locks, name);
        let _guard = lock.lock();
        if let Some(writer) = self.writers.read().get(name) {
            return Ok(writer.clone());
        }

        let directory: Arc<dyn Directory> = Arc::new(VirtualDirectory::new(name, self.store.clone(), self.chunk_size));
        self.directories_built.fetch_add(1, Ordering::SeqCst);
        if self.force_unlock {
            IndexWriter::force_unlock(directory.as_ref())?;
        }
        let writer = Arc::new(IndexWriter::open(name, directory, self.analyzers.clone())?);

        self.writers.write().insert(name.to_string(), writer.clone());
        Ok(writer)
    }

    pub fn get_searcher(&self, name: &str) -> Result<Arc<SearcherHandle>> {
        self.ensure_open()?;
        if let Some(handle) = self.searchers.read().get(name) {
            return Ok(handle.clone());
        }

        let writer = self.get_writer(name)?;
        let lock = Self::name_lock(&self.searcher_locks, name);
        let _guard = lock.lock();
        if let Some(handle) = self.searchers.read().get(name) {
            return Ok(handle.clone());
        }

        let opened_at = Instant::now();
        let reader = writer.open_reader()?;
        let handle = Arc::new(SearcherHandle {
            name: name.to_string(),
            reader: RwLock::new(Arc::new(reader)),
            opened_at: Mutex::new(opened_at),
            in_flight: AtomicBool::new(false),
            reopen_lock: Mutex::new(()),
        });

        self.searchers.write().insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Current snapshot for `name`, opening one if needed.
    pub fn searcher(&self, name: &str) -> Result<Arc<IndexReader>> {
        Ok(self.get_searcher(name)?.reader())
    }

    /// Records that `name` changed; call after the mutation completed.
    pub fn record_change(&self, name: &str) {
        self.last_change.write().insert(name.to_string(), Instant::now());
    }

    pub fn last_change(&self, name: &str) -> Option<Instant> {
        self.last_change.read().get(name).copied()
    }

    pub fn searcher_names(&self) -> Vec<String> {
        self.searchers.read().keys().cloned().collect()
    }

    /// True when `name` changed at or after its searcher was opened.
    pub fn needs_reopen(&self, name: &str) -> bool {
        let Some(handle) = self.searchers.read().get(name).cloned() else {
            return false;
        };
        match self.last_change(name) {
            Some(changed) => changed >= handle.opened_at(),
            None => false,
        }
    }

    /// Claims the in-flight flag of `name`; None when a reopen is already
    /// running or there is no searcher.
    pub fn begin_reopen(&self, name: &str) -> Option<ReopenGuard> {
        let handle = self.searchers.read().get(name).cloned()?;
        handle.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReopenGuard { handle })
    }

    /// Commits pending changes and swaps in a fresh snapshot. On failure the
    /// old snapshot stays in service.
    pub fn reopen(&self, name: &str) -> Result<Arc<IndexReader>> {
        self.ensure_open()?;
        let handle = self.get_searcher(name)?;
        let writer = self.get_writer(name)?;

        let _serial = handle.reopen_lock.lock();
        // Taken before the snapshot so a racing change still looks newer
        let opened_at = Instant::now();
        let reader = writer.commit()
            .and_then(|_| writer.open_reader())
            .map(Arc::new)
            .map_err(|e| Error::new(ErrorKind::ReopenFailure, format!("reopen of '{}' failed: {}", name, e)))?;

        *handle.opened_at.lock() = opened_at;
        *handle.reader.write() = reader.clone();
        tracing::debug!(index = name, version = reader.version(), docs = reader.num_docs(), "reopened searcher");
        Ok(reader)
    }

    /// Reopens `name` only when it is stale.
    pub fn refresh(&self, name: &str) -> Result<Arc<IndexReader>> {
        let handle = self.get_searcher(name)?;
        if self.needs_reopen(name) {
            return self.reopen(name);
        }
        Ok(handle.reader())
    }

    pub fn commit_all(&self) -> Result<()> {
        let writers: Vec<Arc<IndexWriter>> = self.writers.read().values().cloned().collect();
        for writer in writers {
            writer.commit()?;
        }
        Ok(())
    }

    /// Commits and unlocks every writer. The cache refuses new handles afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let writers: Vec<Arc<IndexWriter>> = self.writers.write().drain().map(|(_, w)| w).collect();
        self.searchers.write().clear();

        let mut first_error = None;
        for writer in writers {
            if let Err(e) = writer.close() {
                tracing::error!(index = writer.name(), error = %e, "failed to close index writer");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use crate::core::types::{Entity, FieldDescriptor};
    use crate::query::ast::Query;
    use crate::storage::memory_store::MemoryChunkStore;

    fn cache() -> Arc<IndexHandleCache> {
        Arc::new(IndexHandleCache::new(
            Arc::new(MemoryChunkStore::new()),
            256,
            Arc::new(AnalyzerRegistry::new()),
        ))
    }

    #[test]
    fn concurrent_get_writer_shares_one_handle() {
        let cache = cache();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.get_writer("x").unwrap())
            })
            .collect();
        let writers: Vec<Arc<IndexWriter>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(writers.iter().all(|w| Arc::ptr_eq(w, &writers[0])));
        assert_eq!(cache.directories_built(), 1);
    }

    #[test]
    fn stale_searcher_is_detected_and_reopened() {
        let cache = cache();
        let searcher = cache.get_searcher("Article").unwrap();
        assert!(!cache.needs_reopen("Article"));

        let writer = cache.get_writer("Article").unwrap();
        writer.add_entity(&Entity::new("Article", "1").with_field(FieldDescriptor::text("title", "hello"))).unwrap();
        cache.record_change("Article");
        assert!(cache.needs_reopen("Article"));
        assert_eq!(searcher.reader().num_docs(), 0);

        let reader = cache.refresh("Article").unwrap();
        assert_eq!(reader.num_docs(), 1);
        assert!(!cache.needs_reopen("Article"));
        assert_eq!(reader.search(&Query::term("title", "hello"), None, 1, 10).unwrap().ids, vec!["1"]);
    }

    #[test]
    fn in_flight_flag_is_exclusive() {
        let cache = cache();
        cache.get_searcher("Article").unwrap();

        let guard = cache.begin_reopen("Article").unwrap();
        assert_eq!(guard.name(), "Article");
        assert!(cache.begin_reopen("Article").is_none());
        drop(guard);
        assert!(cache.begin_reopen("Article").is_some());
        assert!(cache.begin_reopen("Unknown").is_none());
    }

    #[test]
    fn close_commits_and_refuses_new_handles() {
        let store = Arc::new(MemoryChunkStore::new());
        let analyzers = Arc::new(AnalyzerRegistry::new());
        let cache = IndexHandleCache::new(store.clone(), 256, analyzers.clone());
        cache.get_writer("Article").unwrap()
            .add_entity(&Entity::new("Article", "1")).unwrap();
        cache.close().unwrap();
        assert_eq!(cache.get_writer("Article").err().unwrap().kind, ErrorKind::InvalidState);

        let reopened = IndexHandleCache::new(store, 256, analyzers);
        assert_eq!(reopened.searcher("Article").unwrap().num_docs(), 1);
    }
}
