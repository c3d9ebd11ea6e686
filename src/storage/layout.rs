use std::path::PathBuf;
use std::fs;
use crate::core::error::Result;
use crate::storage::chunk_store::FileId;

/// Directory structure of the filesystem chunk store
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub chunks_dir: PathBuf,    // One sub-directory of .chk files per file id
    pub files_dir: PathBuf,     // One sub-directory of .rec files per virtual directory
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let chunks_dir = base_dir.join("chunks");
        let files_dir = base_dir.join("files");

        fs::create_dir_all(&chunks_dir)?;
        fs::create_dir_all(&files_dir)?;

        Ok(StorageLayout {
            base_dir,
            chunks_dir,
            files_dir,
        })
    }

    pub fn chunk_dir(&self, file_id: &FileId) -> PathBuf {
        self.chunks_dir.join(file_id.0.to_string())
    }

    pub fn chunk_path(&self, file_id: &FileId, chunk_number: u64) -> PathBuf {
        self.chunk_dir(file_id).join(format!("{:010}.chk", chunk_number))
    }

    pub fn directory_dir(&self, directory: &str) -> PathBuf {
        self.files_dir.join(encode_name(directory))
    }

    // Names are hex encoded so any index or file name maps to a safe path
    pub fn file_record_path(&self, directory: &str, filename: &str) -> PathBuf {
        self.directory_dir(directory).join(format!("{}.rec", encode_name(filename)))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}

/// Parses a chunk number back out of a `.chk` file name.
pub fn chunk_number_of(file_name: &str) -> Option<u64> {
    file_name.strip_suffix(".chk")?.parse().ok()
}

fn encode_name(name: &str) -> String {
    name.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_paths_round_trip_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let id = FileId::new();
        let path = layout.chunk_path(&id, 17);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(chunk_number_of(name), Some(17));
        assert_eq!(chunk_number_of("17.tmp"), None);
    }

    #[test]
    fn names_are_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let path = layout.file_record_path("a/b", "../x");
        assert!(path.starts_with(&layout.files_dir));
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "612f62");
    }
}
