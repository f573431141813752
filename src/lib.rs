//! # CodeIntel
//!
//! A local-first code intelligence engine: it indexes source repositories
//! into a portable SQLite/FTS5 store (plus an optional vector store) and
//! answers symbol lookup, BM25 code search and semantic code search while
//! staying responsive under continuous file change.
//!
//! ## Architecture
//!
//! The crate is organized following Domain-Driven Design principles:
//!
//! - `domain`: core models, the error taxonomy, and the path/identity model
//! - `application`: collaborator interfaces and the engines (registry,
//!   indexer, dispatcher, rerankers, embedding pipeline, watch planner)
//! - `connector`: external integrations (SQLite, tree-sitter, notify,
//!   HTTP collaborators) and the tools façade

pub mod application;
pub mod connector;
pub mod domain;

// Re-export commonly used types
pub use application::*;
pub use connector::*;
pub use domain::*;
