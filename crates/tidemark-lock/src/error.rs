//! Error types for lock operations.

/// Errors from lock acquisition, renewal or release.
///
/// Contention is not an error: it is reported as
/// [`LockOutcome::Denied`](crate::LockOutcome::Denied).
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock store failed or is unreachable.
    #[error("lock store error: {0}")]
    Meta(#[from] tidemark_meta::MetaError),
}
