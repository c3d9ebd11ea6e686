pub mod chunk_store;
pub mod memory_store;
pub mod layout;
pub mod file_lock;
pub mod fs_store;
