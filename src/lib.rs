pub mod executor;
pub mod harvest;
pub mod model;
pub mod source;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use source::HttpSource;
pub use traits::*;
