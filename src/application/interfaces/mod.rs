mod embedding_provider;
mod index_store;
mod plugin;
mod reranker;
mod vector_store;

pub use embedding_provider::*;
pub use index_store::*;
pub use plugin::*;
pub use reranker::*;
pub use vector_store::*;
