//! Error types for compound document and signing operations.

use thiserror::Error;

/// Result type for container and signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// Error types surfaced by the container engine and its consumers.
///
/// Internal invariant violations (an allocator handing out fewer sectors
/// than a stream needs) are not represented here: they panic.
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SigningError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SigningError {
    /// Returns true if this error reports a structurally damaged container.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, SigningError::CorruptContainer(_))
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        SigningError::CorruptContainer(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SigningError::InvalidArgument(msg.into())
    }
}

/// Carry engine errors through `std::io::Read`.
///
/// I/O errors pass through unchanged; everything else becomes
/// `InvalidData` with the typed error as its source.
impl From<SigningError> for std::io::Error {
    fn from(error: SigningError) -> Self {
        match error {
            SigningError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SigningError::CorruptContainer("chain ended early".to_string());
        assert_eq!(error.to_string(), "Corrupt container: chain ended early");

        let error = SigningError::InvalidArgument("not a stream".to_string());
        assert_eq!(error.to_string(), "Invalid argument: not a stream");
    }

    #[test]
    fn test_io_error_round_trip() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: SigningError = io.into();
        assert!(!err.is_corrupt());

        let back: std::io::Error = err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_corrupt_maps_to_invalid_data() {
        let err = SigningError::corrupt("cycle");
        assert!(err.is_corrupt());

        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
        let inner = io
            .get_ref()
            .and_then(|e| e.downcast_ref::<SigningError>())
            .expect("typed source");
        assert!(inner.is_corrupt());
    }
}
