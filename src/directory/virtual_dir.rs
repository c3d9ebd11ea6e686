use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use crate::core::error::{Error, Result};
use crate::directory::file::VirtualFile;
use crate::directory::provider::Directory;
use crate::directory::stream::{IndexInput, IndexOutput, SharedFile};
use crate::storage::chunk_store::ChunkStore;

/// Named set of virtual files backed by a chunk store.
///
/// Files are opened from the store the first time they are referenced and
/// then shared, so every reader and writer of one name sees the same handle.
pub struct VirtualDirectory {
    name: String,
    store: Arc<dyn ChunkStore>,
    chunk_size: usize,
    files: RwLock<HashMap<String, SharedFile>>,
}

impl VirtualDirectory {
    pub fn new(name: &str, store: Arc<dyn ChunkStore>, chunk_size: usize) -> Self {
        VirtualDirectory {
            name: name.to_string(),
            store,
            chunk_size,
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of file handles currently held in memory.
    pub fn open_files(&self) -> usize {
        self.files.read().len()
    }

    fn lookup(&self, filename: &str) -> Result<Option<SharedFile>> {
        if let Some(file) = self.files.read().get(filename) {
            return Ok(Some(file.clone()));
        }

        let mut files = self.files.write();
        if let Some(file) = files.get(filename) {
            return Ok(Some(file.clone()));
        }
        match self.store.find_file(&self.name, filename)? {
            Some(record) => {
                let file = Arc::new(Mutex::new(VirtualFile::open(self.store.clone(), record, self.chunk_size)));
                files.insert(filename.to_string(), file.clone());
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    fn require(&self, filename: &str) -> Result<SharedFile> {
        self.lookup(filename)?
            .ok_or_else(|| Error::file_not_found(&self.name, filename))
    }
}

impl Directory for VirtualDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_all(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.store.list_files(&self.name)?
            .into_iter()
            .map(|record| record.filename)
            .collect();
        // Created but not yet flushed
        names.extend(self.files.read().keys().cloned());
        Ok(names.into_iter().collect())
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lookup(name)?.is_some())
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        Ok(self.require(name)?.lock().length())
    }

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>> {
        Ok(self.require(name)?.lock().last_modified())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let record = self.store.find_file(&self.name, name)?;
        let cached = self.files.read().get(name).cloned();

        let file_id = match (&cached, &record) {
            (Some(file), _) => file.lock().file_id(),
            (None, Some(record)) => record.file_id,
            (None, None) => return Err(Error::file_not_found(&self.name, name)),
        };

        self.store.remove_chunks(file_id, 0)?;
        if record.is_some() {
            self.store.remove_file(&self.name, name)?;
        }
        // Forgotten only once the store no longer has it
        self.files.write().remove(name);
        tracing::trace!(directory = %self.name, file = name, "deleted virtual file");
        Ok(())
    }

    fn create_output(&self, name: &str) -> Result<IndexOutput> {
        if let Some(existing) = self.lookup(name)? {
            existing.lock().truncate(0)?;
            return Ok(IndexOutput::new(existing));
        }

        let file = Arc::new(Mutex::new(
            VirtualFile::create(self.store.clone(), &self.name, name, self.chunk_size),
        ));
        let mut files = self.files.write();
        // Lost a race with another creator: share its handle
        let file = files.entry(name.to_string()).or_insert(file).clone();
        Ok(IndexOutput::new(file))
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        Ok(IndexInput::new(self.require(name)?))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.require(from)?;
        if from == to {
            return Ok(());
        }
        if self.lookup(to)?.is_some() {
            self.delete_file(to)?;
        }

        // New record lands before the old one is removed
        {
            let mut file = source.lock();
            file.set_filename(to);
            file.flush()?;
        }
        self.store.remove_file(&self.name, from)?;

        let mut files = self.files.write();
        files.remove(from);
        files.insert(to.to_string(), source);
        Ok(())
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        for name in names {
            let file = self.files.read().get(name).cloned();
            if let Some(file) = file {
                file.lock().flush()?;
            }
        }
        Ok(())
    }
}
