//! Shared error and result types

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the achievement engine.
///
/// Cloneable so that a single coalesced evaluation can hand the same
/// outcome to every waiter registered in its window.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Persistence gateway call failed (usually transient network I/O)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Achievement catalog could not be loaded or is inconsistent
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// A coalesced batch ended without delivering a result to its waiters
    #[error("Batch dropped: {0}")]
    BatchDropped(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for failures worth retrying on the next trigger
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Persistence(_) | EngineError::BatchDropped(_))
    }
}
