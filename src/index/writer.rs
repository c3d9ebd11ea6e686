use std::collections::HashSet;
use std::sync::Arc;
use chrono::Utc;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Entity;
use crate::directory::provider::Directory;
use crate::index::commit::{CommitPoint, SegmentMeta, PENDING_PREFIX, SEGMENTS_PREFIX, WRITE_LOCK};
use crate::index::document::AnalyzedDocument;
use crate::index::reader::{IndexReader, SegmentReader};
use crate::index::segment::{read_deletes, read_segment, write_deletes, write_segment, SegmentData};

struct LiveSegment {
    meta: SegmentMeta,
    data: Arc<SegmentData>,
    deleted: RoaringBitmap,
    deletes_dirty: bool,
}

struct WriterState {
    commit: CommitPoint,            // Last published commit point
    segments: Vec<LiveSegment>,     // Flushed segments, committed or not
    buffer: SegmentData,            // Documents not yet in a segment
    buffer_deleted: RoaringBitmap,
    segment_counter: u64,
    version: u64,                   // Bumped by every change
    committed_version: u64,
    closed: bool,
}

/// The single writer of one index.
///
/// Holds `write.lock` in its directory for its whole life. All mutations
/// go through one mutex, so changes to one index are applied in order.
pub struct IndexWriter {
    name: String,
    directory: Arc<dyn Directory>,
    analyzers: Arc<AnalyzerRegistry>,
    state: Mutex<WriterState>,
}

impl IndexWriter {
    pub fn open(name: &str, directory: Arc<dyn Directory>, analyzers: Arc<AnalyzerRegistry>) -> Result<Self> {
        if directory.file_exists(WRITE_LOCK)? {
            return Err(Error::new(ErrorKind::LockHeld, format!("index '{}' already has a writer", name)));
        }
        let mut lock = directory.create_output(WRITE_LOCK)?;
        lock.write_u64(Utc::now().timestamp_millis() as u64)?;
        lock.close()?;

        match Self::load(name, directory.clone(), analyzers) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                // Leave the index openable by the next attempt
                if let Err(unlock) = directory.delete_file(WRITE_LOCK) {
                    tracing::warn!(index = name, error = %unlock, "failed to release write lock");
                }
                Err(e)
            }
        }
    }

    fn load(name: &str, directory: Arc<dyn Directory>, analyzers: Arc<AnalyzerRegistry>) -> Result<Self> {
        let commit = CommitPoint::latest(directory.as_ref())?.unwrap_or_default();

        let mut segments = Vec::with_capacity(commit.segments.len());
        for meta in &commit.segments {
            let data = read_segment(directory.as_ref(), &meta.file_name())?;
            let deleted = match meta.del_file_name() {
                Some(file) => read_deletes(directory.as_ref(), &file)?,
                None => RoaringBitmap::new(),
            };
            segments.push(LiveSegment {
                meta: meta.clone(),
                data: Arc::new(data),
                deleted,
                deletes_dirty: false,
            });
        }

        tracing::info!(
            index = name,
            generation = commit.generation,
            segments = segments.len(),
            docs = commit.live_docs(),
            "opened index writer"
        );

        let writer = IndexWriter {
            name: name.to_string(),
            directory,
            analyzers,
            state: Mutex::new(WriterState {
                segment_counter: commit.segment_counter,
                commit,
                segments,
                buffer: SegmentData::new(),
                buffer_deleted: RoaringBitmap::new(),
                version: 0,
                committed_version: 0,
                closed: false,
            }),
        };

        // Segments flushed but never committed before a crash
        let state = writer.state.lock();
        writer.delete_unreferenced(&state);
        drop(state);

        Ok(writer)
    }

    /// Removes a write lock left behind by a writer that never closed.
    pub fn force_unlock(directory: &dyn Directory) -> Result<bool> {
        if !directory.file_exists(WRITE_LOCK)? {
            return Ok(false);
        }
        directory.delete_file(WRITE_LOCK)?;
        tracing::warn!(index = directory.name(), "removed stale write lock");
        Ok(true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn analyzers(&self) -> &Arc<AnalyzerRegistry> {
        &self.analyzers
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().commit.generation
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        let state = self.state.lock();
        state.version != state.committed_version
    }

    fn ensure_open(&self, state: &WriterState) -> Result<()> {
        if state.closed {
            return Err(Error::new(ErrorKind::InvalidState, format!("writer for '{}' is closed", self.name)));
        }
        Ok(())
    }

    pub fn add_entity(&self, entity: &Entity) -> Result<()> {
        let document = AnalyzedDocument::from_entity(entity, &self.analyzers)?;
        self.add_analyzed(document)
    }

    /// Adds a document analyzed elsewhere, e.g. by a parallel rebuild.
    pub fn add_analyzed(&self, document: AnalyzedDocument) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.buffer.add(document);
        state.version += 1;
        Ok(())
    }

    /// Deletes every document stored under (type, id); returns how many.
    pub fn delete_by_key(&self, entity_type: &str, id: &str) -> Result<u64> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        Ok(Self::delete_matching(&mut state, |data| data.docs_for_key(entity_type, id)))
    }

    pub fn delete_by_type(&self, entity_type: &str) -> Result<u64> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        Ok(Self::delete_matching(&mut state, |data| data.docs_for_type(entity_type)))
    }

    /// Delete-by-key then add, applied atomically with respect to readers.
    pub fn update_entity(&self, entity: &Entity) -> Result<()> {
        let document = AnalyzedDocument::from_entity(entity, &self.analyzers)?;

        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        Self::delete_matching(&mut state, |data| data.docs_for_key(&entity.entity_type, &entity.id));
        state.buffer.add(document);
        state.version += 1;
        Ok(())
    }

    pub fn delete_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.segments.clear();
        state.buffer = SegmentData::new();
        state.buffer_deleted = RoaringBitmap::new();
        state.version += 1;
        Ok(())
    }

    fn delete_matching<F>(state: &mut WriterState, select: F) -> u64
    where
        F: Fn(&SegmentData) -> Vec<u32>,
    {
        let mut count = 0;
        for segment in state.segments.iter_mut() {
            for doc in select(segment.data.as_ref()) {
                if segment.deleted.insert(doc) {
                    segment.deletes_dirty = true;
                    count += 1;
                }
            }
        }
        for doc in select(&state.buffer) {
            if state.buffer_deleted.insert(doc) {
                count += 1;
            }
        }
        if count > 0 {
            state.version += 1;
        }
        count
    }

    /// Moves buffered documents into a new segment file.
    fn flush_buffer(&self, state: &mut WriterState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        if state.buffer_deleted.len() == state.buffer.doc_count() as u64 {
            state.buffer = SegmentData::new();
            state.buffer_deleted = RoaringBitmap::new();
            return Ok(());
        }

        // Buffer is taken only once the segment file is written
        let meta = SegmentMeta::new(format!("_{}", state.segment_counter), state.buffer.doc_count());
        let bytes = write_segment(self.directory.as_ref(), &meta.file_name(), &state.buffer)?;
        state.segment_counter += 1;
        let data = std::mem::take(&mut state.buffer);
        let deleted = std::mem::take(&mut state.buffer_deleted);

        tracing::debug!(index = %self.name, segment = %meta.name, docs = meta.doc_count, bytes, "flushed segment");
        state.segments.push(LiveSegment {
            meta,
            data: Arc::new(data),
            deletes_dirty: !deleted.is_empty(),
            deleted,
        });
        Ok(())
    }

    /// Snapshot of everything added or deleted so far, committed or not.
    pub fn open_reader(&self) -> Result<IndexReader> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        self.flush_buffer(&mut state)?;

        let segments = state.segments.iter()
            .map(|segment| {
                let mut meta = segment.meta.clone();
                meta.del_count = segment.deleted.len() as u32;
                SegmentReader {
                    meta,
                    data: segment.data.clone(),
                    deleted: Arc::new(segment.deleted.clone()),
                }
            })
            .collect();

        Ok(IndexReader::new(&self.name, state.version, segments, self.analyzers.clone()))
    }

    /// Makes all changes durable and publishes a new commit point.
    /// Returns false when there was nothing to commit.
    pub fn commit(&self) -> Result<bool> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        self.commit_locked(&mut state)
    }

    fn commit_locked(&self, state: &mut WriterState) -> Result<bool> {
        if state.version == state.committed_version && state.commit.generation > 0 {
            return Ok(false);
        }
        self.flush_buffer(state)?;

        let generation = state.commit.generation + 1;
        state.segments.retain(|s| s.deleted.len() < s.data.doc_count() as u64);

        for segment in state.segments.iter_mut() {
            if segment.deletes_dirty {
                segment.meta.del_generation = generation;
                segment.meta.del_count = segment.deleted.len() as u32;
                if let Some(file) = segment.meta.del_file_name() {
                    write_deletes(self.directory.as_ref(), &file, &segment.deleted)?;
                }
                segment.deletes_dirty = false;
            }
        }

        let commit = CommitPoint {
            generation,
            segment_counter: state.segment_counter,
            segments: state.segments.iter().map(|s| s.meta.clone()).collect(),
            committed_at: Utc::now(),
        };
        commit.publish(self.directory.as_ref())?;

        tracing::debug!(
            index = %self.name,
            generation,
            segments = commit.segments.len(),
            docs = commit.live_docs(),
            "committed index"
        );
        state.commit = commit;
        state.committed_version = state.version;
        self.delete_unreferenced(state);
        Ok(true)
    }

    fn delete_unreferenced(&self, state: &WriterState) {
        let mut keep: HashSet<String> = state.commit.referenced_files();
        keep.extend(state.segments.iter().map(|s| s.meta.file_name()));

        let files = match self.directory.list_all() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(index = %self.name, error = %e, "could not list files for cleanup");
                return;
            }
        };

        for file in files {
            let owned = file.ends_with(".seg")
                || file.ends_with(".del")
                || file.starts_with(SEGMENTS_PREFIX)
                || file.starts_with(PENDING_PREFIX);
            if owned && !keep.contains(&file) {
                if let Err(e) = self.directory.delete_file(&file) {
                    tracing::warn!(index = %self.name, file = %file, error = %e, "failed to delete obsolete file");
                }
            }
        }
    }

    /// Commits and releases the write lock. Further calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        self.commit_locked(&mut state)?;
        self.directory.delete_file(WRITE_LOCK)?;
        state.closed = true;
        tracing::info!(index = %self.name, generation = state.commit.generation, "closed index writer");
        Ok(())
    }
}
