//! Error types for quill-core.

use thiserror::Error;

/// Result type for quill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core.
///
/// Resolution errors (`CellNotFound`, `DependencyNotReady`,
/// `InvalidPositionalAlignment`, `CyclicDependency`) abort a whole run;
/// per-branch evaluation failures never surface here — they are folded into
/// the branch's output record instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A dependency references a cell id that no cell (or its output) carries.
    #[error("cell not found: {0}")]
    CellNotFound(String),

    /// Non-recursive resolution hit an upstream cell that has not run yet.
    #[error("dependency not ready: cell {0} has no processed output")]
    DependencyNotReady(String),

    /// An output reference against the for-each driver could not be aligned
    /// by index (driver missing, not fanned, or length mismatch).
    #[error("invalid positional alignment: {0}")]
    InvalidPositionalAlignment(String),

    /// Cyclic dependency detected in the cell reference graph.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// Invalid operation (e.g., re-running a branch of a non-fanned cell).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Notebook document could not be (de)serialized. A corrupted or
    /// newer-schema document (unknown value/dependency tags) surfaces here.
    #[error("notebook document error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
