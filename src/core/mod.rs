pub mod types;
pub mod error;
pub mod config;
pub mod entity;
pub mod node;
