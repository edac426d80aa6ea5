//! Error types for session engine operations.

/// Error type for session engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Attribute or metadata access on a session that has been invalidated.
    #[error("Session already invalidated: {0}")]
    InvalidSessionAccess(String),

    /// A second invalidation of the same session.
    #[error("Session invalidated twice: {0}")]
    DuplicateInvalidate(String),

    /// Identifier generation kept colliding with live or recent identifiers.
    #[error("No free session identifier after {attempts} attempts")]
    IdentifierExhaustion { attempts: usize },

    /// No live session with this identifier.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The expiration scheduler was built outside a Tokio runtime.
    #[error("No Tokio runtime available for the expiration scheduler")]
    NoRuntime,
}

/// Result type for session engine operations.
pub type Result<T> = std::result::Result<T, Error>;
