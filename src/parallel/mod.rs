pub mod worker_pool;
pub mod indexer;
