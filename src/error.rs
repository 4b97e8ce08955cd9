//! Error types for hierarchy building.
//!
//! Every failure the engine can surface to a `get_nodes` caller is a variant
//! here. `RowsLimitExceeded` is special-cased in two places: the scheduler
//! passes it through without dismantling other subscribers of the same query,
//! and the determine-children probe maps it to "has children".

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the hierarchy engine.
///
/// The type is `Clone` so a shared, replayable node stream can deliver the
/// same terminal error to every subscriber.
#[derive(Debug, Clone, Error)]
pub enum HierarchyError {
    /// A hierarchy level produced more rows than the configured limit.
    #[error("hierarchy level produced more than {limit} rows")]
    RowsLimitExceeded { limit: u64 },

    /// The hierarchy definition returned malformed data.
    #[error("invalid hierarchy definition: {message}")]
    InvalidDefinition { message: String },

    /// Label concatenation encountered a property type that cannot be
    /// formatted into a display string.
    #[error("property '{class_name}.{property_name}' has unsupported primitive type '{type_name}'")]
    UnsupportedPrimitiveType {
        class_name: String,
        property_name: String,
        type_name: String,
    },

    /// Label concatenation referenced a property the schema does not know.
    #[error("property '{property_name}' not found on class '{class_name}'")]
    MissingProperty {
        class_name: String,
        property_name: String,
    },

    /// A grouping node's cached children were evicted and could not be
    /// regenerated from the parent level.
    #[error("children of grouping node '{label}' are not cached and could not be regenerated")]
    MissingGroupingNodeChildren { label: String },

    /// Underlying query executor failure, surfaced unchanged.
    #[error("query executor failure: {0}")]
    Executor(Arc<anyhow::Error>),
}

impl HierarchyError {
    /// Wrap an arbitrary executor failure.
    pub fn executor(err: impl Into<anyhow::Error>) -> Self {
        HierarchyError::Executor(Arc::new(err.into()))
    }

    /// Shorthand for an [`HierarchyError::InvalidDefinition`].
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        HierarchyError::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Whether this error is the distinguished rows-limit signal.
    pub fn is_rows_limit_exceeded(&self) -> bool {
        matches!(self, HierarchyError::RowsLimitExceeded { .. })
    }
}

/// Result type for hierarchy operations.
pub type HierarchyResult<T> = Result<T, HierarchyError>;
