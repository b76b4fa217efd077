//! Error types for imarkdown core.

use thiserror::Error;

/// Result type alias for imarkdown operations.
pub type Result<T> = std::result::Result<T, ImarkdownError>;

/// Main error type for the expression lifecycle.
///
/// Only hard failures live here. Recoverable per-cell conditions (a rejected
/// kernel reply, a stale result record, a result with no displayable mime
/// type) are reported through outcome values instead.
#[derive(Debug, Error)]
pub enum ImarkdownError {
    /// No compute kernel is attached to the session.
    #[error("Session has no kernel")]
    NoKernel,

    /// The compute kernel failed to deliver a reply.
    #[error("Kernel error: {0}")]
    KernelError(String),

    /// A reply was handed to a cell other than the one that issued the request.
    #[error("Reply for cell '{expected}' was delivered to cell '{found}'")]
    CellMismatch {
        /// Cell that issued the request.
        expected: String,
        /// Cell the reply was delivered to.
        found: String,
    },

    /// The host markup pipeline failed to render the cell source.
    #[error("Markup error: {0}")]
    MarkupError(String),

    /// A mime renderer could not be created or failed to render.
    #[error("Render error: {0}")]
    RenderError(String),

    /// Cell metadata holds a value that is not a valid result record.
    #[error("Invalid metadata under '{key}': {reason}")]
    InvalidMetadata {
        /// Metadata key that was read.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The cell owning a render gate was dropped before the gate resolved.
    #[error("Render gate closed before rendering completed")]
    GateClosed,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Notebook document could not be interpreted.
    #[error("Notebook error: {0}")]
    NotebookError(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
