use std::sync::Arc;
use crate::cluster::message::ClusterMessage;
use crate::cluster::node::ClusterConfig;
use crate::cluster::server::MessageHandler;
use crate::cluster::transport::ClusterTransport;
use crate::core::entity::{EntityRegistry, EntitySource};
use crate::core::error::Result;
use crate::core::types::Entity;
use crate::handle::cache::IndexHandleCache;
use crate::parallel::worker_pool::{Completion, WorkerPool};

/// Turns entity changes into index mutations, locally and on every peer.
///
/// Local mutations run on the worker pool; the returned `Completion`
/// resolves once the writer has applied them. Peer delivery is fire and
/// forget and never affects the local result.
pub struct ChangeNotifier {
    cache: Arc<IndexHandleCache>,
    registry: Arc<EntityRegistry>,
    source: Arc<dyn EntitySource>,
    pool: Arc<WorkerPool>,
    transport: Arc<ClusterTransport>,
    cluster: Option<Arc<ClusterConfig>>,
}

impl ChangeNotifier {
    pub fn new(
        cache: Arc<IndexHandleCache>,
        registry: Arc<EntityRegistry>,
        source: Arc<dyn EntitySource>,
        pool: Arc<WorkerPool>,
        transport: Arc<ClusterTransport>,
        cluster: Option<Arc<ClusterConfig>>,
    ) -> Self {
        ChangeNotifier {
            cache,
            registry,
            source,
            pool,
            transport,
            cluster,
        }
    }

    pub fn on_insert(self: &Arc<Self>, entity: Entity) -> Result<Completion> {
        self.submit_and_broadcast(ClusterMessage::Insert(entity))
    }

    pub fn on_update(self: &Arc<Self>, entity: Entity) -> Result<Completion> {
        self.submit_and_broadcast(ClusterMessage::Update(entity))
    }

    pub fn on_remove(self: &Arc<Self>, entity_type: &str, id: &str) -> Result<Completion> {
        self.submit_and_broadcast(ClusterMessage::Remove {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }

    /// Reindexes everything that embeds data of `(entity_type, id)`.
    pub fn on_ref_by_invalidate(self: &Arc<Self>, entity_type: &str, id: &str) -> Result<Completion> {
        self.submit_and_broadcast(ClusterMessage::RefByInvalidate {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }

    /// Applies a message on this node only. Changes to one index run in
    /// the order they were submitted.
    pub fn apply(self: &Arc<Self>, message: ClusterMessage) -> Result<Completion> {
        let index = self.registry.index_name_for(message.entity_type());
        let notifier = self.clone();
        self.pool.submit_keyed(&index, move || notifier.apply_local(&message))
    }

    fn submit_and_broadcast(self: &Arc<Self>, message: ClusterMessage) -> Result<Completion> {
        let completion = self.apply(message.clone())?;
        if let Some(cluster) = &self.cluster {
            let peers = cluster.peers();
            if !peers.is_empty() {
                self.transport.broadcast(&peers, &message, &self.pool);
            }
        }
        Ok(completion)
    }

    fn apply_local(&self, message: &ClusterMessage) -> Result<()> {
        let index = self.registry.index_name_for(message.entity_type());
        let result = match message {
            ClusterMessage::Insert(entity) => {
                self.cache.get_writer(&index)?.add_entity(entity)
            }
            ClusterMessage::Update(entity) => {
                self.cache.get_writer(&index)?.update_entity(entity)
            }
            ClusterMessage::Remove { entity_type, id } => {
                self.cache.get_writer(&index)?.delete_by_key(entity_type, id).map(|_| ())
            }
            ClusterMessage::RefByInvalidate { entity_type, id } => {
                return self.reindex_referencing(entity_type, id);
            }
        };

        match result {
            Ok(()) => {
                self.cache.record_change(&index);
                tracing::debug!(index = %index, kind = message.kind(), id = message.id(), "applied change");
                Ok(())
            }
            Err(e) => {
                tracing::error!(index = %index, kind = message.kind(), id = message.id(), error = %e, "failed to apply change");
                Err(e)
            }
        }
    }

    fn reindex_referencing(&self, entity_type: &str, id: &str) -> Result<()> {
        let referencing = self.source.referencing(entity_type, id)?;
        for entity in &referencing {
            let index = self.registry.index_name_for(&entity.entity_type);
            self.cache.get_writer(&index)?.update_entity(entity)?;
            self.cache.record_change(&index);
        }
        tracing::debug!(entity_type, id, reindexed = referencing.len(), "invalidated referencing entities");
        Ok(())
    }
}

impl MessageHandler for ChangeNotifier {
    /// Inbound messages are already on the pool; apply them in place and
    /// never re-broadcast.
    fn handle(&self, message: ClusterMessage) -> Result<()> {
        self.apply_local(&message)
    }

    fn ordering_key(&self, message: &ClusterMessage) -> String {
        self.registry.index_name_for(message.entity_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::analysis::analyzer::AnalyzerRegistry;
    use crate::core::entity::MemoryEntitySource;
    use crate::core::error::ErrorKind;
    use crate::core::types::FieldDescriptor;
    use crate::parallel::worker_pool::BackpressurePolicy;
    use crate::query::ast::Query;
    use crate::storage::memory_store::MemoryChunkStore;

    fn notifier(source: Arc<MemoryEntitySource>) -> (Arc<ChangeNotifier>, Arc<IndexHandleCache>) {
        notifier_on(Arc::new(MemoryChunkStore::new()), source, 2)
    }

    fn notifier_on(
        store: Arc<MemoryChunkStore>,
        source: Arc<MemoryEntitySource>,
        threads: usize,
    ) -> (Arc<ChangeNotifier>, Arc<IndexHandleCache>) {
        let cache = Arc::new(IndexHandleCache::new(store, 512, Arc::new(AnalyzerRegistry::new())));
        let pool = Arc::new(WorkerPool::new("notifier-test", threads, 32, BackpressurePolicy::Block).unwrap());
        let notifier = Arc::new(ChangeNotifier::new(
            cache.clone(),
            Arc::new(EntityRegistry::new()),
            source,
            pool,
            Arc::new(ClusterTransport::new(Duration::from_millis(100))),
            None,
        ));
        (notifier, cache)
    }

    fn hits(cache: &IndexHandleCache, index: &str, query: Query) -> Vec<String> {
        cache.reopen(index).unwrap().search(&query, None, 1, 10).unwrap().ids
    }

    #[test]
    fn insert_update_remove_apply_locally() {
        let (notifier, cache) = notifier(Arc::new(MemoryEntitySource::new()));
        let article = Entity::new("Article", "1").with_field(FieldDescriptor::text("title", "first draft"));

        notifier.on_insert(article).unwrap().wait().unwrap();
        assert_eq!(hits(&cache, "Article", Query::term("title", "draft")), vec!["1"]);
        assert!(cache.last_change("Article").is_some());

        let revised = Entity::new("Article", "1").with_field(FieldDescriptor::text("title", "final version"));
        notifier.on_update(revised).unwrap().wait().unwrap();
        assert!(hits(&cache, "Article", Query::term("title", "draft")).is_empty());
        assert_eq!(hits(&cache, "Article", Query::term("title", "final")), vec!["1"]);

        notifier.on_remove("Article", "1").unwrap().wait().unwrap();
        assert_eq!(cache.searcher("Article").unwrap().num_docs(), 1);
        assert_eq!(cache.reopen("Article").unwrap().num_docs(), 0);
    }

    #[test]
    fn ref_by_invalidate_reindexes_referencing_entities() {
        let source = Arc::new(MemoryEntitySource::new());
        let (notifier, cache) = notifier(source.clone());

        let book = Entity::new("Book", "b1").with_field(FieldDescriptor::text("author_name", "Ursula"));
        notifier.on_insert(book).unwrap().wait().unwrap();

        // The author was renamed; the stored book now embeds the new name
        source.put(Entity::new("Book", "b1").with_field(FieldDescriptor::text("author_name", "Le Guin")));
        source.add_reference(("Book", "b1"), ("Author", "a1"));
        notifier.on_ref_by_invalidate("Author", "a1").unwrap().wait().unwrap();

        assert_eq!(hits(&cache, "Book", Query::term("author_name", "guin")), vec!["b1"]);
        assert!(hits(&cache, "Book", Query::term("author_name", "ursula")).is_empty());
    }

    #[test]
    fn handler_applies_without_broadcast() {
        let (notifier, cache) = notifier(Arc::new(MemoryEntitySource::new()));
        notifier.handle(ClusterMessage::Insert(Entity::new("Article", "9"))).unwrap();
        assert_eq!(cache.reopen("Article").unwrap().num_docs(), 1);
    }

    #[test]
    fn insert_then_remove_of_one_id_apply_in_order() {
        let (notifier, cache) = notifier_on(Arc::new(MemoryChunkStore::new()), Arc::new(MemoryEntitySource::new()), 4);

        let mut completions = Vec::new();
        for i in 0..500 {
            let id = i.to_string();
            let article = Entity::new("Article", &id).with_field(FieldDescriptor::text("title", "short lived"));
            completions.push(notifier.on_insert(article).unwrap());
            completions.push(notifier.on_remove("Article", &id).unwrap());
        }
        for completion in completions {
            completion.wait().unwrap();
        }
        assert_eq!(cache.reopen("Article").unwrap().num_docs(), 0);
    }

    #[test]
    fn accepted_changes_survive_store_outage() {
        let store = Arc::new(MemoryChunkStore::new());
        let (notifier, cache) = notifier_on(store.clone(), Arc::new(MemoryEntitySource::new()), 2);
        let first = Entity::new("Article", "1").with_field(FieldDescriptor::text("title", "before outage"));
        notifier.on_insert(first).unwrap().wait().unwrap();
        assert_eq!(cache.reopen("Article").unwrap().num_docs(), 1);

        store.set_available(false);
        let second = Entity::new("Article", "2").with_field(FieldDescriptor::text("title", "during outage"));
        notifier.on_insert(second).unwrap().wait().unwrap();
        assert_eq!(cache.reopen("Article").unwrap_err().kind, ErrorKind::ReopenFailure);
        // The previous snapshot stays in service
        assert_eq!(cache.searcher("Article").unwrap().num_docs(), 1);

        store.set_available(true);
        let reader = cache.reopen("Article").unwrap();
        assert_eq!(reader.num_docs(), 2);
        assert_eq!(reader.search(&Query::term("title", "outage"), None, 1, 10).unwrap().total, 2);
    }
}
