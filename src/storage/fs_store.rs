use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::chunk_store::{ChunkStore, FileId, FileRecord};
use crate::storage::file_lock::FileLock;
use crate::storage::layout::{chunk_number_of, StorageLayout};

/// Chunk store persisted as one file per chunk and one per file record.
///
/// Every record is written to a temp file and renamed into place, so a single
/// chunk or record is replaced atomically.
pub struct FsChunkStore {
    layout: StorageLayout,
    _lock: FileLock,
}

// [ CRC32 (u32 LE) ][ CHUNK BYTES ]
const CHUNK_HEADER: usize = 4;

impl FsChunkStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let layout = StorageLayout::new(base_dir.into())?;
        let lock = FileLock::acquire(&layout)?;
        tracing::info!(path = %layout.base_dir.display(), "opened filesystem chunk store");

        Ok(FsChunkStore { layout, _lock: lock })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        tmp.persist(target).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn unavailable(operation: &str, err: io::Error) -> Error {
    Error::new(ErrorKind::ChunkStoreUnavailable, format!("{} failed: {}", operation, err))
}

impl ChunkStore for FsChunkStore {
    fn find_file(&self, directory: &str, filename: &str) -> Result<Option<FileRecord>> {
        let path = self.layout.file_record_path(directory, filename);
        match Self::read_optional(&path).map_err(|e| unavailable("find_file", e))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn list_files(&self, directory: &str) -> Result<Vec<FileRecord>> {
        let dir = self.layout.directory_dir(directory);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable("list_files", e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| unavailable("list_files", e))?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rec") {
                continue;
            }
            // A record removed between read_dir and read is simply gone
            if let Some(data) = Self::read_optional(&path).map_err(|e| unavailable("list_files", e))? {
                records.push(bincode::deserialize::<FileRecord>(&data)?);
            }
        }

        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    fn save_file(&self, record: &FileRecord) -> Result<()> {
        let data = bincode::serialize(record)?;
        let dir = self.layout.directory_dir(&record.directory);
        let path = self.layout.file_record_path(&record.directory, &record.filename);
        Self::write_atomic(&dir, &path, &data).map_err(|e| unavailable("save_file", e))
    }

    fn remove_file(&self, directory: &str, filename: &str) -> Result<()> {
        let path = self.layout.file_record_path(directory, filename);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable("remove_file", e)),
        }
    }

    fn find_chunk(&self, file_id: FileId, chunk_number: u64) -> Result<Option<Vec<u8>>> {
        let path = self.layout.chunk_path(&file_id, chunk_number);
        let Some(raw) = Self::read_optional(&path).map_err(|e| unavailable("find_chunk", e))? else {
            return Ok(None);
        };

        if raw.len() < CHUNK_HEADER {
            return Err(Error::new(ErrorKind::Corrupted, format!("truncated chunk {}", path.display())));
        }
        let expected = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let data = &raw[CHUNK_HEADER..];
        if crc32fast::hash(data) != expected {
            return Err(Error::new(ErrorKind::Corrupted, format!("checksum mismatch in {}", path.display())));
        }

        Ok(Some(data.to_vec()))
    }

    fn save_chunk(&self, file_id: FileId, chunk_number: u64, data: &[u8]) -> Result<()> {
        let mut raw = Vec::with_capacity(CHUNK_HEADER + data.len());
        raw.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        raw.extend_from_slice(data);

        let dir = self.layout.chunk_dir(&file_id);
        let path = self.layout.chunk_path(&file_id, chunk_number);
        Self::write_atomic(&dir, &path, &raw).map_err(|e| unavailable("save_chunk", e))
    }

    fn remove_chunks(&self, file_id: FileId, from_chunk: u64) -> Result<()> {
        let dir = self.layout.chunk_dir(&file_id);
        if from_chunk == 0 {
            return match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(unavailable("remove_chunks", e)),
            };
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(unavailable("remove_chunks", e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| unavailable("remove_chunks", e))?;
            let name = entry.file_name();
            let Some(number) = name.to_str().and_then(chunk_number_of) else {
                continue;
            };
            if number >= from_chunk {
                fs::remove_file(entry.path()).map_err(|e| unavailable("remove_chunks", e))?;
            }
        }
        Ok(())
    }
}
