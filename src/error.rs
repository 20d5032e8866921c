use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoveredError>;

/// Crate-wide error type.
///
/// `Busy`, `StaleVictimSync`, `MissingVictim`, and `InvalidationTimeout` are
/// transient protocol conditions handled internally with retry or fallback;
/// only `Capacity` and not-found conditions reach end users. Invariant
/// breaches are programmer errors and panic instead of returning here.
#[derive(Debug, Error)]
pub enum CoveredError {
    #[error("write lock busy: {0}")]
    Busy(String),
    #[error("stale victim syncset: {0}")]
    StaleVictimSync(String),
    #[error("missing victim metadata: {0}")]
    MissingVictim(String),
    #[error("invalidation timed out: {0}")]
    InvalidationTimeout(String),
    #[error("object exceeds capacity: {0}")]
    Capacity(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
}

impl CoveredError {
    /// Whether the caller may retry the operation after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoveredError::Busy(_)
                | CoveredError::StaleVictimSync(_)
                | CoveredError::MissingVictim(_)
                | CoveredError::InvalidationTimeout(_)
        )
    }
}
