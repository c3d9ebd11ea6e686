pub mod posting;
pub mod inverted;
pub mod document;
pub mod segment;
pub mod commit;
pub mod reader;
pub mod writer;
