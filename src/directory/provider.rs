use chrono::{DateTime, Utc};
use crate::core::error::Result;
use crate::directory::stream::{IndexInput, IndexOutput};

/// Storage-provider contract the index engine persists through.
///
/// The engine never sees chunks: it creates, reads, renames and deletes
/// named files, and nothing it writes is durable until the output is closed
/// or the file is synced.
pub trait Directory: Send + Sync {
    fn name(&self) -> &str;

    fn list_all(&self) -> Result<Vec<String>>;

    fn file_exists(&self, name: &str) -> Result<bool>;

    fn file_length(&self, name: &str) -> Result<u64>;

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>>;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// New empty file, truncating any existing file of that name.
    fn create_output(&self, name: &str) -> Result<IndexOutput>;

    /// Fails with `FileNotFound` when the name does not exist.
    fn open_input(&self, name: &str) -> Result<IndexInput>;

    /// Replaces `to` if it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn sync(&self, names: &[String]) -> Result<()>;
}
