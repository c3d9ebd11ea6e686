pub mod file;
pub mod stream;
pub mod provider;
pub mod virtual_dir;
