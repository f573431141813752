pub mod error;
pub mod identity;
pub mod models;

pub use error::*;
pub use identity::HashCache;
pub use models::*;
