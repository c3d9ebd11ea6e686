use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::handle::cache::IndexHandleCache;
use crate::parallel::worker_pool::{Completion, WorkerPool};

/// Periodically swaps stale searchers for fresh snapshots.
///
/// Each pass looks at every cached searcher; one whose index changed at or
/// after its last open gets a reopen task on the worker pool, unless a reopen
/// for that name is still in flight.
pub struct ReopenScheduler {
    cache: Arc<IndexHandleCache>,
    pool: Arc<WorkerPool>,
    timer: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl ReopenScheduler {
    pub fn new(cache: Arc<IndexHandleCache>, pool: Arc<WorkerPool>) -> Self {
        ReopenScheduler {
            cache,
            pool,
            timer: Mutex::new(None),
        }
    }

    /// Starts the timer thread. A second call is a no-op.
    pub fn start(&self, period: Duration) -> Result<()> {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let cache = self.cache.clone();
        let pool = self.pool.clone();
        let handle = thread::Builder::new()
            .name("chunkdex-reopen".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        reopen_stale(&cache, &pool);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::info!(period_ms = period.as_millis() as u64, "reopen scheduler started");
        *timer = Some((stop_tx, handle));
        Ok(())
    }

    /// Runs one pass now. Returns the completions of the reopens it queued.
    pub fn tick(&self) -> Vec<Completion> {
        reopen_stale(&self.cache, &self.pool)
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn shutdown(&self) {
        let Some((stop_tx, handle)) = self.timer.lock().take() else {
            return;
        };
        drop(stop_tx);
        if handle.join().is_err() {
            tracing::warn!("reopen scheduler thread panicked");
        }
        tracing::info!("reopen scheduler stopped");
    }
}

impl Drop for ReopenScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reopen_stale(cache: &Arc<IndexHandleCache>, pool: &WorkerPool) -> Vec<Completion> {
    let mut completions = Vec::new();
    for name in cache.searcher_names() {
        let Some(guard) = cache.begin_reopen(&name) else {
            tracing::trace!(index = %name, "reopen already in flight");
            continue;
        };
        if !cache.needs_reopen(&name) {
            continue;
        }

        let task_cache = cache.clone();
        let submitted = pool.submit(move || {
            match task_cache.reopen(guard.name()) {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::error!(index = %guard.name(), error = %e, "searcher reopen failed, keeping previous snapshot");
                    Err(e)
                }
            }
        });
        match submitted {
            Ok(completion) => completions.push(completion),
            // The guard went down with the rejected task; next pass retries
            Err(e) => tracing::warn!(index = %name, error = %e, "could not queue searcher reopen"),
        }
    }
    completions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::AnalyzerRegistry;
    use crate::core::types::Entity;
    use crate::parallel::worker_pool::BackpressurePolicy;
    use crate::storage::memory_store::MemoryChunkStore;

    fn setup() -> (Arc<IndexHandleCache>, Arc<WorkerPool>) {
        let cache = Arc::new(IndexHandleCache::new(
            Arc::new(MemoryChunkStore::new()),
            128,
            Arc::new(AnalyzerRegistry::new()),
        ));
        let pool = Arc::new(WorkerPool::new("reopen-test", 2, 16, BackpressurePolicy::Block).unwrap());
        (cache, pool)
    }

    #[test]
    fn tick_reopens_only_stale_searchers() {
        let (cache, pool) = setup();
        let scheduler = ReopenScheduler::new(cache.clone(), pool);
        cache.get_searcher("Article").unwrap();
        cache.get_searcher("Author").unwrap();
        assert!(scheduler.tick().is_empty());

        cache.get_writer("Article").unwrap().add_entity(&Entity::new("Article", "1")).unwrap();
        cache.record_change("Article");

        let completions = scheduler.tick();
        assert_eq!(completions.len(), 1);
        for completion in completions {
            completion.wait().unwrap();
        }
        assert_eq!(cache.searcher("Article").unwrap().num_docs(), 1);
        assert!(!cache.needs_reopen("Article"));
    }

    #[test]
    fn in_flight_reopen_is_skipped() {
        let (cache, pool) = setup();
        let scheduler = ReopenScheduler::new(cache.clone(), pool);
        cache.get_searcher("Article").unwrap();
        cache.record_change("Article");

        let guard = cache.begin_reopen("Article").unwrap();
        assert!(scheduler.tick().is_empty());
        drop(guard);
        assert_eq!(scheduler.tick().len(), 1);
    }

    #[test]
    fn timer_thread_refreshes_within_period() {
        let (cache, pool) = setup();
        let scheduler = ReopenScheduler::new(cache.clone(), pool);
        cache.get_searcher("Article").unwrap();
        scheduler.start(Duration::from_millis(20)).unwrap();
        assert!(scheduler.is_running());

        cache.get_writer("Article").unwrap().add_entity(&Entity::new("Article", "1")).unwrap();
        cache.record_change("Article");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.searcher("Article").unwrap().num_docs() == 0 {
            assert!(std::time::Instant::now() < deadline, "searcher never reopened");
            thread::sleep(Duration::from_millis(10));
        }

        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }
}
