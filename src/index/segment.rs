use roaring::RoaringBitmap;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::directory::provider::Directory;
use crate::index::document::{AnalyzedDocument, StoredDocument, ID_FIELD, TYPE_FIELD};
use crate::index::inverted::{InvertedIndex, Term};

/// Contents of one immutable segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentData {
    pub documents: Vec<StoredDocument>,
    pub index: InvertedIndex,
}

impl SegmentData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a document and returns its segment-local ordinal.
    pub fn add(&mut self, document: AnalyzedDocument) -> u32 {
        let doc = self.documents.len() as u32;
        self.index.add_document(doc, &document);
        self.documents.push(document.stored);
        doc
    }

    pub fn doc_count(&self) -> u32 {
        self.documents.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Ordinals of the documents stored under (type, id).
    pub fn docs_for_key(&self, entity_type: &str, id: &str) -> Vec<u32> {
        self.index.search_term(&Term::new(ID_FIELD, id))
            .map(|list| list.postings.iter()
                .map(|p| p.doc)
                .filter(|doc| self.documents[*doc as usize].entity_type == entity_type)
                .collect())
            .unwrap_or_default()
    }

    pub fn docs_for_type(&self, entity_type: &str) -> Vec<u32> {
        self.index.search_term(&Term::new(TYPE_FIELD, entity_type))
            .map(|list| list.postings.iter().map(|p| p.doc).collect())
            .unwrap_or_default()
    }
}

/// Segment file header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u32,     // Format version
    pub doc_count: u32,   // Number of documents
    pub checksum: u32,    // CRC32 of the compressed body
    pub raw_len: u64,     // Serialized body length before compression
    pub body_len: u64,    // Bytes following the header
}

impl SegmentHeader {
    pub const MAGIC: u32 = 0x4348_4b53;
    pub const VERSION: u32 = 1;
    pub const SIZE: u64 = 32;
}

// [ HEADER (magic, version, doc_count, checksum, raw_len, body_len) ] <- byte 0
// [ LZ4 BLOCK (bincode SegmentData) ]
pub fn write_segment(directory: &dyn Directory, file_name: &str, data: &SegmentData) -> Result<u64> {
    let raw = bincode::serialize(data)?;
    let body = lz4_flex::compress_prepend_size(&raw);
    let header = SegmentHeader {
        magic: SegmentHeader::MAGIC,
        version: SegmentHeader::VERSION,
        doc_count: data.doc_count(),
        checksum: crc32fast::hash(&body),
        raw_len: raw.len() as u64,
        body_len: body.len() as u64,
    };

    let mut out = directory.create_output(file_name)?;
    out.write_u32(header.magic)?;
    out.write_u32(header.version)?;
    out.write_u32(header.doc_count)?;
    out.write_u32(header.checksum)?;
    out.write_u64(header.raw_len)?;
    out.write_u64(header.body_len)?;
    out.write_bytes(&body)?;
    let written = out.position();
    out.close()?;

    Ok(written)
}

pub fn read_segment(directory: &dyn Directory, file_name: &str) -> Result<SegmentData> {
    let mut input = directory.open_input(file_name)?;
    if input.length() < SegmentHeader::SIZE {
        return Err(Error::new(ErrorKind::Corrupted, format!("segment {} shorter than its header", file_name)));
    }

    let header = SegmentHeader {
        magic: input.read_u32()?,
        version: input.read_u32()?,
        doc_count: input.read_u32()?,
        checksum: input.read_u32()?,
        raw_len: input.read_u64()?,
        body_len: input.read_u64()?,
    };
    if header.magic != SegmentHeader::MAGIC {
        return Err(Error::new(ErrorKind::Corrupted, format!("{} is not a segment file", file_name)));
    }
    if header.version != SegmentHeader::VERSION {
        return Err(Error::new(ErrorKind::InvalidArgument, format!("Incompatible segment version {}", header.version)));
    }
    if SegmentHeader::SIZE + header.body_len != input.length() {
        return Err(Error::new(ErrorKind::Corrupted, format!("segment {} body length mismatch", file_name)));
    }

    let body = input.read_vec(header.body_len as usize)?;
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::new(ErrorKind::Corrupted, format!("checksum mismatch in segment {}", file_name)));
    }

    let raw = lz4_flex::decompress_size_prepended(&body)?;
    if raw.len() as u64 != header.raw_len {
        return Err(Error::new(ErrorKind::Corrupted, format!("segment {} decompressed to the wrong size", file_name)));
    }
    let data: SegmentData = bincode::deserialize(&raw)?;
    if data.doc_count() != header.doc_count {
        return Err(Error::new(ErrorKind::Corrupted, format!("segment {} doc count mismatch", file_name)));
    }

    Ok(data)
}

pub fn write_deletes(directory: &dyn Directory, file_name: &str, deleted: &RoaringBitmap) -> Result<()> {
    let mut raw = Vec::with_capacity(deleted.serialized_size());
    deleted.serialize_into(&mut raw)?;

    let mut out = directory.create_output(file_name)?;
    out.write_u32(crc32fast::hash(&raw))?;
    out.write_bytes(&raw)?;
    out.close()
}

pub fn read_deletes(directory: &dyn Directory, file_name: &str) -> Result<RoaringBitmap> {
    let mut input = directory.open_input(file_name)?;
    let checksum = input.read_u32()?;
    let raw = input.read_to_end()?;
    if crc32fast::hash(&raw) != checksum {
        return Err(Error::new(ErrorKind::Corrupted, format!("checksum mismatch in {}", file_name)));
    }
    Ok(RoaringBitmap::deserialize_from(&raw[..])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::analysis::analyzer::AnalyzerRegistry;
    use crate::core::types::{Entity, FieldDescriptor};
    use crate::directory::virtual_dir::VirtualDirectory;
    use crate::storage::memory_store::MemoryChunkStore;

    fn sample() -> SegmentData {
        let analyzers = AnalyzerRegistry::new();
        let mut data = SegmentData::new();
        for (id, title) in [("1", "chunked storage"), ("2", "virtual files")] {
            let entity = Entity::new("Article", id).with_field(FieldDescriptor::text("title", title));
            data.add(AnalyzedDocument::from_entity(&entity, &analyzers).unwrap());
        }
        data
    }

    #[test]
    fn segment_survives_the_directory() {
        let store = Arc::new(MemoryChunkStore::new());
        let dir = VirtualDirectory::new("Article", store, 64);

        let written = write_segment(&dir, "_0.seg", &sample()).unwrap();
        assert_eq!(dir.file_length("_0.seg").unwrap(), written);

        let data = read_segment(&dir, "_0.seg").unwrap();
        assert_eq!(data.doc_count(), 2);
        assert_eq!(data.docs_for_key("Article", "2"), vec![1]);
        assert!(data.docs_for_key("Comment", "2").is_empty());
        assert_eq!(data.docs_for_type("Article"), vec![0, 1]);
    }

    #[test]
    fn damaged_segment_is_corrupted() {
        let store = Arc::new(MemoryChunkStore::new());
        let dir = VirtualDirectory::new("Article", store, 64);
        write_segment(&dir, "_0.seg", &sample()).unwrap();

        let len = dir.file_length("_0.seg").unwrap();
        let mut input = dir.open_input("_0.seg").unwrap();
        let mut bytes = input.read_vec(len as usize).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x5a;

        let mut out = dir.create_output("_0.seg").unwrap();
        out.write_bytes(&bytes).unwrap();
        out.close().unwrap();

        let err = read_segment(&dir, "_0.seg").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupted);
    }

    #[test]
    fn deletes_file() {
        let store = Arc::new(MemoryChunkStore::new());
        let dir = VirtualDirectory::new("Article", store, 8);
        let mut deleted = RoaringBitmap::new();
        deleted.insert(3);
        deleted.insert(70_000);

        write_deletes(&dir, "_0_1.del", &deleted).unwrap();
        assert_eq!(read_deletes(&dir, "_0_1.del").unwrap(), deleted);
    }
}
