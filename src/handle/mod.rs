pub mod cache;
pub mod reopen;
