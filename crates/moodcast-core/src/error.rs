use thiserror::Error;

/// Bad client input. Always recoverable: the caller either rejects the
/// request with a 4xx or substitutes a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("session identifier is required")]
    MissingIdentifier,

    #[error("session identifier must be at least {min} characters")]
    InvalidIdentifier { min: usize },

    #[error("session identifier must be at most {max} characters")]
    IdentifierTooLong { max: usize },
}
