//! Error types for the metadata layer.

/// Errors returned by [`RepairHistory`](crate::RepairHistory) and
/// [`LockStore`](crate::LockStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// The backing store cannot be reached. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl MetaError {
    /// Whether retrying on the next pass may succeed.
    ///
    /// Decode failures point at corrupt records and will not heal by
    /// themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serde(_))
    }
}
