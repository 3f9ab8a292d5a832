/*!
 * Error types for the beamwire visit crate.
 */
use thiserror::Error;

/// Error type for visit and collection operations
#[derive(Error, Debug)]
pub enum VisitError {
    /// The path provider was called before a successful update, or
    /// after a failed one
    #[error("No active collection; call update() first")]
    NoActiveCollection,

    /// The numbering service was unreachable or returned a non-success
    /// response
    #[error("Numbering service error: {0}")]
    NumberingService(String),

    /// The collection-state lock was poisoned
    #[error("Failed to acquire lock on collection state")]
    CollectionLock,

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] beamwire_core::error::Error),
}

/// Result type for visit and collection operations
pub type Result<T> = std::result::Result<T, VisitError>;

impl VisitError {
    /// Create a new numbering-service error
    pub fn numbering_service<S: AsRef<str>>(msg: S) -> Self {
        VisitError::NumberingService(msg.as_ref().to_string())
    }
}

impl From<reqwest::Error> for VisitError {
    fn from(err: reqwest::Error) -> Self {
        VisitError::NumberingService(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_collection_message() {
        let err = VisitError::NoActiveCollection;
        assert!(err.to_string().contains("update()"));
    }

    #[test]
    fn test_numbering_service_constructor() {
        let err = VisitError::numbering_service("HTTP 503");
        assert!(
            matches!(err, VisitError::NumberingService(ref msg) if msg.as_str() == "HTTP 503")
        );
    }
}
