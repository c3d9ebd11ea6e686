pub mod message;
pub mod node;
pub mod transport;
pub mod server;
pub mod notifier;
