// Chariot program builders
// Fluent interfaces for assembling syntax trees without a parser front end

pub mod block_builder;
pub mod nodes;

pub use block_builder::BlockBuilder;
pub use nodes::*;

/// Common trait for builders of syntax-tree objects
pub trait ObjectBuilder<T> {
    /// Build the final object, consuming the builder
    fn build(self) -> Result<T, BuilderError>;

    /// Validate the current state without building
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Error type for builder operations
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
