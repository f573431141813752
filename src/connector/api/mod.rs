mod tools;

pub use tools::*;
