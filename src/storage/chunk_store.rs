use chrono::{DateTime, Utc};
use uuid::Uuid;
use serde::{Deserialize, Serialize};
use crate::core::error::Result;

/// Default chunk capacity (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Unique file identifier, stable across renames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

/// Row of the files collection, keyed by (directory, filename)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub directory: String,
    pub filename: String,
    pub file_id: FileId,
    pub length: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub file_id: FileId,
    pub chunk_number: u64,
}

/// One fixed-capacity unit of file data
#[derive(Debug, Clone)]
pub struct Chunk {
    pub key: ChunkKey,
    pub data: Vec<u8>,
    pub dirty: bool,
}

impl Chunk {
    pub fn empty(file_id: FileId, chunk_number: u64, capacity: usize) -> Self {
        Chunk {
            key: ChunkKey { file_id, chunk_number },
            data: Vec::with_capacity(capacity),
            dirty: false,
        }
    }

    pub fn loaded(file_id: FileId, chunk_number: u64, data: Vec<u8>) -> Self {
        Chunk {
            key: ChunkKey { file_id, chunk_number },
            data,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Storage adapter over the chunk and files collections.
///
/// Every operation is atomic for a single record only; nothing here spans
/// several chunks. Backend outages surface as `ChunkStoreUnavailable`.
pub trait ChunkStore: Send + Sync {
    fn find_file(&self, directory: &str, filename: &str) -> Result<Option<FileRecord>>;

    fn list_files(&self, directory: &str) -> Result<Vec<FileRecord>>;

    fn save_file(&self, record: &FileRecord) -> Result<()>;

    /// Removes the files-collection row only; chunks go through `remove_chunks`.
    fn remove_file(&self, directory: &str, filename: &str) -> Result<()>;

    fn find_chunk(&self, file_id: FileId, chunk_number: u64) -> Result<Option<Vec<u8>>>;

    fn save_chunk(&self, file_id: FileId, chunk_number: u64, data: &[u8]) -> Result<()>;

    /// Removes every chunk of `file_id` numbered `from_chunk` or higher.
    fn remove_chunks(&self, file_id: FileId, from_chunk: u64) -> Result<()>;
}
