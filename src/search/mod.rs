pub mod results;
pub mod executor;
