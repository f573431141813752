pub mod config;
pub mod dispatcher;
pub mod embedder;
pub mod fusion;
pub mod indexer;
pub mod interfaces;
pub mod query;
pub mod registry;
pub mod rerank;
pub mod snippet;
pub mod watcher;

pub use config::*;
pub use dispatcher::*;
pub use embedder::*;
pub use indexer::*;
pub use interfaces::*;
pub use registry::*;
pub use rerank::*;
pub use watcher::*;
