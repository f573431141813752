pub mod chunking;
mod fallback_plugin;
mod fs_watcher;
mod http_embedding;
mod http_vector_store;
mod memory_vector_store;
mod mock_embedding;
mod treesitter_plugin;

pub use fallback_plugin::*;
pub use fs_watcher::*;
pub use http_embedding::*;
pub use http_vector_store::*;
pub use memory_vector_store::*;
pub use mock_embedding::*;
pub use treesitter_plugin::*;
