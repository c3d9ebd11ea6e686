use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::cluster::node::ClusterNode;
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::worker_pool::BackpressurePolicy;
use crate::storage::chunk_store::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Virtual file store
    pub storage_path: PathBuf,
    pub chunk_size: usize,
    // Clear write locks left by a node that did not shut down cleanly
    pub force_unlock: bool,

    // Searcher freshness
    pub reopen_period_ms: u64,
    pub rebuild_batch_size: usize,
    pub default_search_field: String,

    // Cluster
    pub cluster_enabled: bool,
    pub cluster_host: String,                       // Bind host; also this node's identity in peer lists
    pub cluster_port: u16,
    pub peer_addresses: Vec<String>,
    pub max_message_size: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,

    // Worker pool
    pub worker_threads: usize,
    pub worker_queue_capacity: usize,
    pub backpressure: BackpressurePolicy,

    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            chunk_size: DEFAULT_CHUNK_SIZE,               // 256KB per chunk
            force_unlock: false,

            reopen_period_ms: 30_000,                      // Reopen stale searchers every 30s
            rebuild_batch_size: 500,
            default_search_field: "content".to_string(),

            cluster_enabled: false,
            cluster_host: "0.0.0.0".to_string(),
            cluster_port: 7070,
            peer_addresses: Vec::new(),
            max_message_size: 4 * 1024 * 1024,             // 4MB per cluster message
            connect_timeout_ms: 3_000,
            read_timeout_ms: 10_000,

            worker_threads: num_cpus::get().max(2),
            worker_queue_capacity: 1024,
            backpressure: BackpressurePolicy::Reject,

            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| Error::new(ErrorKind::Config, format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::new(ErrorKind::Config, "chunk_size must be positive"));
        }
        // length prefix + tag is the smallest frame
        if self.max_message_size < 5 {
            return Err(Error::new(ErrorKind::Config, "max_message_size too small"));
        }
        if self.worker_threads == 0 || self.worker_queue_capacity == 0 {
            return Err(Error::new(ErrorKind::Config, "worker pool needs threads and queue capacity"));
        }
        if self.rebuild_batch_size == 0 {
            return Err(Error::new(ErrorKind::Config, "rebuild_batch_size must be positive"));
        }
        if self.reopen_period_ms == 0 {
            return Err(Error::new(ErrorKind::Config, "reopen_period_ms must be positive"));
        }
        self.peers()?;
        Ok(())
    }

    pub fn peers(&self) -> Result<Vec<ClusterNode>> {
        self.peer_addresses.iter()
            .map(|address| address.parse::<ClusterNode>()
                .map_err(|e| Error::new(ErrorKind::Config, e.context)))
            .collect()
    }

    pub fn cluster_bind_address(&self) -> String {
        format!("{}:{}", self.cluster_host, self.cluster_port)
    }

    pub fn reopen_period(&self) -> Duration {
        Duration::from_millis(self.reopen_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let config = Config::from_toml_str(r#"
            chunk_size = 1024
            cluster_enabled = true
            cluster_port = 9100
            peer_addresses = ["10.0.0.2:9100", "node-c:9100"]
            backpressure = "block"
        "#).unwrap();

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.cluster_port, 9100);
        assert_eq!(config.backpressure, BackpressurePolicy::Block);
        assert_eq!(config.reopen_period_ms, 30_000);
        let peers = config.peers().unwrap();
        assert_eq!(peers[1], ClusterNode::new("node-c", 9100));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_toml_str("chunk_size = 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);

        let err = Config::from_toml_str(r#"peer_addresses = ["no-port"]"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);

        let err = Config::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }
}
