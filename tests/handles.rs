use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use chunkdex::analysis::analyzer::AnalyzerRegistry;
use chunkdex::core::config::Config;
use chunkdex::core::entity::NoEntitySource;
use chunkdex::core::node::SearchNode;
use chunkdex::core::types::{Entity, FieldDescriptor};
use chunkdex::handle::cache::IndexHandleCache;
use chunkdex::storage::memory_store::MemoryChunkStore;

#[test]
fn concurrent_callers_share_one_writer() {
    let cache = Arc::new(IndexHandleCache::new(
        Arc::new(MemoryChunkStore::new()),
        1024,
        Arc::new(AnalyzerRegistry::new()),
    ));

    let threads: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            thread::spawn(move || {
                let name = if i % 2 == 0 { "x" } else { "y" };
                (name, cache.get_writer(name).unwrap())
            })
        })
        .collect();
    let writers: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    for (name, writer) in &writers {
        let first = &writers.iter().find(|(n, _)| n == name).unwrap().1;
        assert!(Arc::ptr_eq(writer, first));
    }
    assert_eq!(cache.directories_built(), 2);
}

#[test]
fn searcher_catches_up_within_reopen_period() {
    let config = Config {
        worker_threads: 2,
        reopen_period_ms: 50,
        ..Config::default()
    };
    let node = SearchNode::start(config, Arc::new(MemoryChunkStore::new()), Arc::new(NoEntitySource)).unwrap();

    // Open the searcher before the change so it is stale afterwards
    assert_eq!(node.search("Article", "fresh", None, 1, 10).unwrap().total, 0);
    node.insert(Entity::new("Article", "1").with_field(FieldDescriptor::text("content", "fresh news")))
        .unwrap()
        .wait()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if node.search("Article", "fresh", None, 1, 10).unwrap().total == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "change never became visible");
        thread::sleep(Duration::from_millis(20));
    }
    assert!(!node.cache().needs_reopen("Article"));
    node.shutdown().unwrap();
}

#[test]
fn explicit_refresh_gives_read_your_writes() {
    let config = Config {
        worker_threads: 2,
        reopen_period_ms: 600_000,
        ..Config::default()
    };
    let node = SearchNode::start(config, Arc::new(MemoryChunkStore::new()), Arc::new(NoEntitySource)).unwrap();
    node.search("Article", "*", None, 1, 10).unwrap();

    node.insert(Entity::new("Article", "1")).unwrap().wait().unwrap();
    assert_eq!(node.search("Article", "*", None, 1, 10).unwrap().total, 0);
    assert_eq!(node.refresh("Article").unwrap().num_docs(), 1);
    assert_eq!(node.search("Article", "*", None, 1, 10).unwrap().ids, vec!["1"]);
}
