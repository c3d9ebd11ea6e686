use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::chunk_store::{Chunk, ChunkStore, FileId, FileRecord};

/// Random-access view of one file assembled from fixed-size chunks.
///
/// Chunks are fetched lazily and kept in `chunks` once touched. Writes only
/// change memory; `flush` is the single point where they reach the store.
pub struct VirtualFile {
    store: Arc<dyn ChunkStore>,
    directory: String,
    filename: String,
    file_id: FileId,
    chunk_size: usize,
    length: u64,
    last_modified: DateTime<Utc>,
    chunks: BTreeMap<u64, Chunk>,
    // Lowest chunk number to drop from the store at the next flush
    truncated_from: Option<u64>,
    meta_dirty: bool,
}

impl VirtualFile {
    /// Fresh, empty file. Nothing is stored until the first flush.
    pub fn create(store: Arc<dyn ChunkStore>, directory: &str, filename: &str, chunk_size: usize) -> Self {
        VirtualFile {
            store,
            directory: directory.to_string(),
            filename: filename.to_string(),
            file_id: FileId::new(),
            chunk_size,
            length: 0,
            last_modified: Utc::now(),
            chunks: BTreeMap::new(),
            truncated_from: None,
            meta_dirty: true,
        }
    }

    pub fn open(store: Arc<dyn ChunkStore>, record: FileRecord, chunk_size: usize) -> Self {
        VirtualFile {
            store,
            directory: record.directory,
            filename: record.filename,
            file_id: record.file_id,
            chunk_size,
            length: record.length,
            last_modified: record.last_modified,
            chunks: BTreeMap::new(),
            truncated_from: None,
            meta_dirty: false,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn dirty_chunks(&self) -> usize {
        self.chunks.values().filter(|c| c.dirty).count()
    }

    pub fn is_dirty(&self) -> bool {
        self.meta_dirty || self.truncated_from.is_some() || self.dirty_chunks() > 0
    }

    pub fn record(&self) -> FileRecord {
        FileRecord {
            directory: self.directory.clone(),
            filename: self.filename.clone(),
            file_id: self.file_id,
            length: self.length,
            last_modified: self.last_modified,
        }
    }

    #[inline]
    fn locate(&self, position: u64) -> (u64, usize) {
        let chunk_size = self.chunk_size as u64;
        (position / chunk_size, (position % chunk_size) as usize)
    }

    fn load_chunk(&mut self, chunk_number: u64) -> Result<&mut Chunk> {
        if !self.chunks.contains_key(&chunk_number) {
            let data = self.store.find_chunk(self.file_id, chunk_number)?
                .ok_or_else(|| Error::new(
                    ErrorKind::ChunkNotFound,
                    format!("{}/{} chunk {} (file length {})",
                            self.directory, self.filename, chunk_number, self.length),
                ))?;
            self.chunks.insert(chunk_number, Chunk::loaded(self.file_id, chunk_number, data));
        }
        // Present: inserted above or already cached
        self.chunks.get_mut(&chunk_number)
            .ok_or_else(|| Error::new(ErrorKind::Internal, "chunk vanished from cache"))
    }

    /// Chunk to write into: cached, fetched if the file already covers it,
    /// or created empty past the end of the file.
    fn chunk_for_write(&mut self, chunk_number: u64) -> Result<&mut Chunk> {
        let covered = chunk_number * (self.chunk_size as u64) < self.length;
        if !self.chunks.contains_key(&chunk_number) && !covered {
            self.chunks.insert(chunk_number, Chunk::empty(self.file_id, chunk_number, self.chunk_size));
        }
        self.load_chunk(chunk_number)
    }

    pub fn read_byte(&mut self, position: u64) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_range(position, &mut byte)?;
        Ok(byte[0])
    }

    /// Fills `out` with the bytes starting at `position`.
    pub fn read_range(&mut self, position: u64, out: &mut [u8]) -> Result<()> {
        let end = position + out.len() as u64;
        if end > self.length {
            return Err(Error::new(
                ErrorKind::Io,
                format!("read past EOF: {}..{} of {} in {}", position, end, self.length, self.filename),
            ));
        }

        let mut done = 0usize;
        while done < out.len() {
            let (chunk_number, offset) = self.locate(position + done as u64);
            let wanted = (self.chunk_size - offset).min(out.len() - done);
            let chunk = self.load_chunk(chunk_number)?;

            // The file length says these bytes exist; a short chunk is damage
            if offset + wanted > chunk.len() {
                return Err(Error::new(
                    ErrorKind::ChunkNotFound,
                    format!("chunk {} holds {} bytes, needed {}", chunk_number, chunk.len(), offset + wanted),
                ));
            }
            out[done..done + wanted].copy_from_slice(&chunk.data[offset..offset + wanted]);
            done += wanted;
        }

        Ok(())
    }

    pub fn write_byte(&mut self, position: u64, byte: u8) -> Result<()> {
        self.write_range(position, &[byte])
    }

    /// Writes `bytes` at `position`, growing the file as needed. Bytes of a
    /// touched chunk beyond the written range are kept.
    pub fn write_range(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        if position > self.length {
            // Zero-fill the gap so every offset below `length` is backed by a chunk
            let gap = vec![0u8; (position - self.length) as usize];
            let start = self.length;
            self.write_chunks(start, &gap)?;
        }
        self.write_chunks(position, bytes)
    }

    fn write_chunks(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < bytes.len() {
            let (chunk_number, offset) = self.locate(position + done as u64);
            let count = (self.chunk_size - offset).min(bytes.len() - done);
            let chunk = self.chunk_for_write(chunk_number)?;

            let end = offset + count;
            if chunk.data.len() < end {
                chunk.data.resize(end, 0);
            }
            chunk.data[offset..end].copy_from_slice(&bytes[done..done + count]);
            chunk.dirty = true;
            done += count;
        }

        if !bytes.is_empty() {
            self.length = self.length.max(position + bytes.len() as u64);
            self.last_modified = Utc::now();
            self.meta_dirty = true;
        }
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.length;
        self.write_range(end, bytes)
    }

    /// Shrinks (or zero-extends) the file to `length` bytes.
    pub fn truncate(&mut self, length: u64) -> Result<()> {
        if length >= self.length {
            let extra = vec![0u8; (length - self.length) as usize];
            return self.append(&extra);
        }

        let chunk_size = self.chunk_size as u64;
        let keep = length.div_ceil(chunk_size);
        let tail = (length % chunk_size) as usize;

        if tail != 0 {
            let chunk = self.load_chunk(keep - 1)?;
            chunk.data.truncate(tail);
            chunk.dirty = true;
        }
        self.chunks.retain(|n, _| *n < keep);
        self.truncated_from = Some(self.truncated_from.map_or(keep, |k| k.min(keep)));

        self.length = length;
        self.last_modified = Utc::now();
        self.meta_dirty = true;
        Ok(())
    }

    /// Gives the file a new name; the record moves on the next flush.
    pub fn set_filename(&mut self, filename: &str) {
        self.filename = filename.to_string();
        self.meta_dirty = true;
    }

    /// Persists dropped chunks, dirty chunks and then the file record.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(from) = self.truncated_from {
            self.store.remove_chunks(self.file_id, from)?;
            self.truncated_from = None;
        }

        for (number, chunk) in self.chunks.iter_mut() {
            if chunk.dirty {
                self.store.save_chunk(self.file_id, *number, &chunk.data)?;
                chunk.dirty = false;
            }
        }

        if self.meta_dirty {
            self.store.save_file(&self.record())?;
            self.meta_dirty = false;
        }

        Ok(())
    }

    /// Drops cached clean chunks; they are fetched again on demand.
    pub fn evict_clean(&mut self) {
        self.chunks.retain(|_, chunk| chunk.dirty);
    }
}
