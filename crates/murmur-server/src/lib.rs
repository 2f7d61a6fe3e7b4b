pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod server;

pub use broadcast::BroadcastSink;
pub use config::{BroadcastStyle, ServerConfig, WireCodec};
pub use error::CommandError;
pub use handler::CommandServer;
