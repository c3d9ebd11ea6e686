use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::cluster::node::{ClusterConfig, ClusterNode};
use crate::cluster::notifier::ChangeNotifier;
use crate::cluster::server::{ClusterServer, MessageHandler, ServerConfig};
use crate::cluster::transport::ClusterTransport;
use crate::core::config::Config;
use crate::core::entity::{EntityRegistry, EntitySource};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Entity, Indexable};
use crate::handle::cache::IndexHandleCache;
use crate::handle::reopen::ReopenScheduler;
use crate::index::reader::IndexReader;
use crate::parallel::indexer::ParallelIndexer;
use crate::parallel::worker_pool::{Completion, WorkerPool};
use crate::query::ast::Query;
use crate::query::parser::QueryParser;
use crate::search::results::{SearchPage, Sort};
use crate::storage::chunk_store::ChunkStore;

/// A running search node: handle cache, reopen scheduler, worker pool and,
/// when clustering is enabled, the replication server.
pub struct SearchNode {
    config: Config,
    cache: Arc<IndexHandleCache>,
    registry: Arc<EntityRegistry>,
    source: Arc<dyn EntitySource>,
    pool: Arc<WorkerPool>,
    scheduler: ReopenScheduler,
    notifier: Arc<ChangeNotifier>,
    indexer: ParallelIndexer,
    cluster: Option<Arc<ClusterConfig>>,
    server: Option<ClusterServer>,
    stopped: AtomicBool,
}

impl SearchNode {
    pub fn start(config: Config, store: Arc<dyn ChunkStore>, source: Arc<dyn EntitySource>) -> Result<Self> {
        config.validate()?;

        let analyzers = Arc::new(AnalyzerRegistry::new());
        let cache = Arc::new(
            IndexHandleCache::new(store, config.chunk_size, analyzers)
                .with_force_unlock(config.force_unlock),
        );
        let pool = Arc::new(WorkerPool::new(
            "chunkdex-worker",
            config.worker_threads,
            config.worker_queue_capacity,
            config.backpressure,
        )?);
        let indexer = ParallelIndexer::new(config.worker_threads)?;
        let registry = Arc::new(EntityRegistry::new());
        let transport = Arc::new(ClusterTransport::new(config.connect_timeout()));

        let cluster = if config.cluster_enabled {
            let local = ClusterNode::new(&config.cluster_host, config.cluster_port);
            Some(Arc::new(ClusterConfig::new(local, config.peers()?)))
        } else {
            None
        };

        let notifier = Arc::new(ChangeNotifier::new(
            cache.clone(),
            registry.clone(),
            source.clone(),
            pool.clone(),
            transport,
            cluster.clone(),
        ));

        let server = if cluster.is_some() {
            let server_config = ServerConfig {
                bind_address: config.cluster_bind_address(),
                max_message_size: config.max_message_size,
                read_timeout: config.read_timeout(),
            };
            let handler: Arc<dyn MessageHandler> = notifier.clone();
            Some(ClusterServer::start(server_config, handler, pool.clone())?)
        } else {
            None
        };

        let scheduler = ReopenScheduler::new(cache.clone(), pool.clone());
        scheduler.start(config.reopen_period())?;

        tracing::info!(
            storage = %config.storage_path.display(),
            cluster = config.cluster_enabled,
            workers = config.worker_threads,
            "search node started"
        );

        Ok(SearchNode {
            config,
            cache,
            registry,
            source,
            pool,
            scheduler,
            notifier,
            indexer,
            cluster,
            server,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<IndexHandleCache> {
        &self.cache
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::InvalidState, "search node is shut down"));
        }
        Ok(())
    }

    pub fn insert(&self, entity: Entity) -> Result<Completion> {
        self.ensure_running()?;
        self.notifier.on_insert(entity)
    }

    pub fn insert_indexable<T: Indexable>(&self, item: &T) -> Result<Completion> {
        self.insert(item.to_entity())
    }

    pub fn update(&self, entity: Entity) -> Result<Completion> {
        self.ensure_running()?;
        self.notifier.on_update(entity)
    }

    pub fn update_indexable<T: Indexable>(&self, item: &T) -> Result<Completion> {
        self.update(item.to_entity())
    }

    pub fn remove(&self, entity_type: &str, id: &str) -> Result<Completion> {
        self.ensure_running()?;
        self.notifier.on_remove(entity_type, id)
    }

    pub fn invalidate_ref_by(&self, entity_type: &str, id: &str) -> Result<Completion> {
        self.ensure_running()?;
        self.notifier.on_ref_by_invalidate(entity_type, id)
    }

    /// Parses `query` against the configured default field and searches the
    /// current snapshot of `index`.
    pub fn search(&self, index: &str, query: &str, sort: Option<&Sort>, page_number: usize, page_size: usize) -> Result<SearchPage> {
        let query = QueryParser::new(&self.config.default_search_field).parse(query)?;
        self.search_query(index, &query, sort, page_number, page_size)
    }

    pub fn search_query(&self, index: &str, query: &Query, sort: Option<&Sort>, page_number: usize, page_size: usize) -> Result<SearchPage> {
        self.ensure_running()?;
        self.cache.searcher(index)?.search(query, sort, page_number, page_size)
    }

    /// Reopens `index` now if it changed since its snapshot was taken.
    pub fn refresh(&self, index: &str) -> Result<Arc<IndexReader>> {
        self.ensure_running()?;
        self.cache.refresh(index)
    }

    /// Replaces every indexed entity of `entity_type` with what the source
    /// holds, a batch at a time. Returns the number of entities indexed.
    pub fn rebuild_index(&self, entity_type: &str) -> Result<u64> {
        self.ensure_running()?;
        let index = self.registry.index_name_for(entity_type);
        let writer = self.cache.get_writer(&index)?;
        let batch_size = self.config.rebuild_batch_size;
        let expected = self.source.count(entity_type)?;
        tracing::info!(index = %index, entity_type, expected, batch_size, "rebuilding index");

        self.indexer.reset_progress();
        let removed = writer.delete_by_type(entity_type)?;
        writer.commit()?;

        let mut offset = 0u64;
        loop {
            let batch = self.source.page(entity_type, offset, batch_size)?;
            if batch.is_empty() {
                break;
            }
            let documents = self.indexer.analyze_batch(&batch, self.cache.analyzers())?;
            for document in documents {
                writer.add_analyzed(document)?;
            }
            writer.commit()?;
            self.cache.record_change(&index);

            offset += batch.len() as u64;
            tracing::debug!(index = %index, indexed = offset, expected, "rebuild batch committed");
            if batch.len() < batch_size {
                break;
            }
        }

        self.cache.record_change(&index);
        self.cache.reopen(&index)?;
        tracing::info!(index = %index, entity_type, removed, indexed = offset, "rebuild finished");
        Ok(offset)
    }

    /// Adds a peer at runtime; false when it was already known.
    pub fn add_peer(&self, address: &str) -> Result<bool> {
        let cluster = self.cluster.as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "clustering is disabled"))?;
        Ok(cluster.add_peer(address.parse()?))
    }

    pub fn peers(&self) -> Vec<ClusterNode> {
        self.cluster.as_ref().map(|c| c.peers()).unwrap_or_default()
    }

    /// Address the replication server is bound to.
    pub fn cluster_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }

    /// Stops accepting work, drains queued tasks and closes every writer.
    pub fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(server) = &self.server {
            server.shutdown();
        }
        self.scheduler.shutdown();
        self.pool.shutdown();
        self.cache.close()?;
        tracing::info!("search node stopped");
        Ok(())
    }
}

impl Drop for SearchNode {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "search node shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::MemoryEntitySource;
    use crate::core::types::FieldDescriptor;
    use crate::storage::memory_store::MemoryChunkStore;

    struct Article {
        id: u32,
        title: String,
        views: f64,
    }

    impl Indexable for Article {
        const ENTITY_TYPE: &'static str = "Article";

        fn id(&self) -> String {
            self.id.to_string()
        }

        fn descriptors(&self) -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::text("content", self.title.as_str()),
                FieldDescriptor::keyword("views", self.views),
            ]
        }
    }

    fn config() -> Config {
        Config {
            worker_threads: 2,
            reopen_period_ms: 60_000,
            rebuild_batch_size: 2,
            ..Config::default()
        }
    }

    #[test]
    fn indexable_round_trip_through_search() {
        let node = SearchNode::start(config(), Arc::new(MemoryChunkStore::new()), Arc::new(MemoryEntitySource::new())).unwrap();
        for (id, title, views) in [(1, "rust chunk store", 10.0), (2, "chunk math", 30.0), (3, "unrelated", 5.0)] {
            node.insert_indexable(&Article { id, title: title.to_string(), views }).unwrap().wait().unwrap();
        }
        node.refresh("Article").unwrap();

        let page = node.search("Article", "chunk", Some(&Sort::by("views").reversed()), 1, 10).unwrap();
        assert_eq!(page.ids, vec!["2", "1"]);
        assert_eq!(page.total, 2);

        node.remove("Article", "2").unwrap().wait().unwrap();
        node.refresh("Article").unwrap();
        assert_eq!(node.search("Article", "chunk", None, 1, 10).unwrap().ids, vec!["1"]);

        node.shutdown().unwrap();
        assert_eq!(node.insert(Entity::new("Article", "4")).err().unwrap().kind, ErrorKind::InvalidState);
    }

    #[test]
    fn rebuild_replaces_index_contents_in_batches() {
        let source = Arc::new(MemoryEntitySource::new());
        for id in 0..5 {
            source.put(Entity::new("Article", &id.to_string()).with_field(FieldDescriptor::text("content", "rebuilt")));
        }
        let node = SearchNode::start(config(), Arc::new(MemoryChunkStore::new()), source).unwrap();
        node.insert(Entity::new("Article", "stale").with_field(FieldDescriptor::text("content", "stale"))).unwrap().wait().unwrap();

        assert_eq!(node.rebuild_index("Article").unwrap(), 5);
        assert_eq!(node.search("Article", "rebuilt", None, 1, 10).unwrap().total, 5);
        assert_eq!(node.search("Article", "stale", None, 1, 10).unwrap().total, 0);
    }

    #[test]
    fn add_peer_requires_clustering() {
        let node = SearchNode::start(config(), Arc::new(MemoryChunkStore::new()), Arc::new(MemoryEntitySource::new())).unwrap();
        assert_eq!(node.add_peer("10.0.0.2:7070").unwrap_err().kind, ErrorKind::InvalidState);
        assert!(node.cluster_addr().is_none());
        assert!(node.peers().is_empty());
    }
}
