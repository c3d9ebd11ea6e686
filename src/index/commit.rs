use std::collections::HashSet;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::directory::provider::Directory;

pub const SEGMENTS_PREFIX: &str = "segments_";
pub const PENDING_PREFIX: &str = "pending_segments_";
pub const WRITE_LOCK: &str = "write.lock";

/// A segment as recorded in a commit point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: String,
    pub doc_count: u32,
    pub del_count: u32,
    // 0 when the segment has no delete file
    pub del_generation: u64,
}

impl SegmentMeta {
    pub fn new(name: String, doc_count: u32) -> Self {
        SegmentMeta { name, doc_count, del_count: 0, del_generation: 0 }
    }

    pub fn file_name(&self) -> String {
        format!("{}.seg", self.name)
    }

    pub fn del_file_name(&self) -> Option<String> {
        (self.del_generation > 0).then(|| format!("{}_{}.del", self.name, self.del_generation))
    }

    pub fn live_docs(&self) -> u32 {
        self.doc_count - self.del_count
    }
}

/// The set of live segments of one generation, published as `segments_<gen>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPoint {
    pub generation: u64,
    pub segment_counter: u64,
    pub segments: Vec<SegmentMeta>,
    pub committed_at: DateTime<Utc>,
}

impl Default for CommitPoint {
    fn default() -> Self {
        CommitPoint {
            generation: 0,
            segment_counter: 0,
            segments: Vec::new(),
            committed_at: Utc::now(),
        }
    }
}

// [ MAGIC (u32) ][ CRC32 (u32) ][ BINCODE COMMIT POINT ]
const COMMIT_MAGIC: u32 = 0x4348_4b43;

impl CommitPoint {
    pub fn file_name(generation: u64) -> String {
        format!("{}{}", SEGMENTS_PREFIX, generation)
    }

    pub fn generation_of(file_name: &str) -> Option<u64> {
        file_name.strip_prefix(SEGMENTS_PREFIX)?.parse().ok()
    }

    /// Newest commit point in the directory, if any.
    pub fn latest(directory: &dyn Directory) -> Result<Option<CommitPoint>> {
        let newest = directory.list_all()?
            .iter()
            .filter_map(|name| Self::generation_of(name))
            .max();

        match newest {
            Some(generation) => Ok(Some(Self::read(directory, generation)?)),
            None => Ok(None),
        }
    }

    pub fn read(directory: &dyn Directory, generation: u64) -> Result<CommitPoint> {
        let file_name = Self::file_name(generation);
        let mut input = directory.open_input(&file_name)?;
        if input.read_u32()? != COMMIT_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, format!("{} is not a commit point", file_name)));
        }
        let checksum = input.read_u32()?;
        let raw = input.read_to_end()?;
        if crc32fast::hash(&raw) != checksum {
            return Err(Error::new(ErrorKind::Corrupted, format!("checksum mismatch in {}", file_name)));
        }
        Ok(bincode::deserialize(&raw)?)
    }

    /// Writes the commit point under a pending name, then renames it into
    /// place so a reader never sees a partial `segments_<gen>`.
    pub fn publish(&self, directory: &dyn Directory) -> Result<()> {
        let raw = bincode::serialize(self)?;
        let pending = format!("{}{}", PENDING_PREFIX, self.generation);

        let mut out = directory.create_output(&pending)?;
        out.write_u32(COMMIT_MAGIC)?;
        out.write_u32(crc32fast::hash(&raw))?;
        out.write_bytes(&raw)?;
        out.close()?;

        directory.rename(&pending, &Self::file_name(self.generation))
    }

    /// Every file this commit point needs, itself included.
    pub fn referenced_files(&self) -> HashSet<String> {
        let mut files: HashSet<String> = self.segments.iter()
            .flat_map(|segment| std::iter::once(segment.file_name()).chain(segment.del_file_name()))
            .collect();
        files.insert(Self::file_name(self.generation));
        files
    }

    pub fn live_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.live_docs() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::directory::virtual_dir::VirtualDirectory;
    use crate::storage::memory_store::MemoryChunkStore;

    #[test]
    fn latest_generation_wins() {
        let dir = VirtualDirectory::new("Article", Arc::new(MemoryChunkStore::new()), 32);
        assert!(CommitPoint::latest(&dir).unwrap().is_none());

        for generation in 1..=3 {
            let commit = CommitPoint {
                generation,
                segment_counter: generation,
                segments: vec![SegmentMeta::new(format!("_{}", generation), 4)],
                ..CommitPoint::default()
            };
            commit.publish(&dir).unwrap();
        }

        let latest = CommitPoint::latest(&dir).unwrap().unwrap();
        assert_eq!(latest.generation, 3);
        assert_eq!(latest.segments[0].name, "_3");
        assert!(!dir.list_all().unwrap().iter().any(|f| f.starts_with(PENDING_PREFIX)));
    }

    #[test]
    fn referenced_files_include_deletes() {
        let mut meta = SegmentMeta::new("_0".into(), 10);
        meta.del_generation = 2;
        meta.del_count = 3;
        let commit = CommitPoint { generation: 2, segments: vec![meta], ..CommitPoint::default() };

        let files = commit.referenced_files();
        assert!(files.contains("_0.seg"));
        assert!(files.contains("_0_2.del"));
        assert!(files.contains("segments_2"));
        assert_eq!(commit.live_docs(), 7);
    }
}
