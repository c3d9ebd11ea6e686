use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::RwLock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::chunk_store::{ChunkKey, ChunkStore, FileId, FileRecord};

/// Chunk store kept entirely in memory.
///
/// Several nodes of one process can share an instance through `Arc`; an
/// outage can be simulated with `set_available(false)`.
pub struct MemoryChunkStore {
    files: RwLock<HashMap<(String, String), FileRecord>>,
    chunks: RwLock<BTreeMap<ChunkKey, Vec<u8>>>,
    available: AtomicBool,
    chunk_writes: AtomicU64,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        MemoryChunkStore {
            files: RwLock::new(HashMap::new()),
            chunks: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            chunk_writes: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of chunks currently held for one file.
    pub fn chunk_count(&self, file_id: FileId) -> usize {
        self.chunks.read().keys().filter(|k| k.file_id == file_id).count()
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.read().len()
    }

    /// Total `save_chunk` calls since creation.
    pub fn chunk_writes(&self) -> u64 {
        self.chunk_writes.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::ChunkStoreUnavailable, "memory chunk store is offline"))
        }
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn find_file(&self, directory: &str, filename: &str) -> Result<Option<FileRecord>> {
        self.check_available()?;
        let key = (directory.to_string(), filename.to_string());
        Ok(self.files.read().get(&key).cloned())
    }

    fn list_files(&self, directory: &str) -> Result<Vec<FileRecord>> {
        self.check_available()?;
        let mut records: Vec<FileRecord> = self.files.read()
            .values()
            .filter(|r| r.directory == directory)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    fn save_file(&self, record: &FileRecord) -> Result<()> {
        self.check_available()?;
        let key = (record.directory.clone(), record.filename.clone());
        self.files.write().insert(key, record.clone());
        Ok(())
    }

    fn remove_file(&self, directory: &str, filename: &str) -> Result<()> {
        self.check_available()?;
        self.files.write().remove(&(directory.to_string(), filename.to_string()));
        Ok(())
    }

    fn find_chunk(&self, file_id: FileId, chunk_number: u64) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.chunks.read().get(&ChunkKey { file_id, chunk_number }).cloned())
    }

    fn save_chunk(&self, file_id: FileId, chunk_number: u64, data: &[u8]) -> Result<()> {
        self.check_available()?;
        self.chunks.write().insert(ChunkKey { file_id, chunk_number }, data.to_vec());
        self.chunk_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_chunks(&self, file_id: FileId, from_chunk: u64) -> Result<()> {
        self.check_available()?;
        let start = ChunkKey { file_id, chunk_number: from_chunk };
        let end = ChunkKey { file_id, chunk_number: u64::MAX };
        let mut chunks = self.chunks.write();
        let doomed: Vec<ChunkKey> = chunks.range(start..=end).map(|(k, _)| *k).collect();
        for key in doomed {
            chunks.remove(&key);
        }
        Ok(())
    }
}
