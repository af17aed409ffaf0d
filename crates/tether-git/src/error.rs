//! Error types for tether-git.

use std::time::Duration;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No branch or tag resolves to the requested name.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// The repository has no remote with the given name.
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// A network operation exceeded the configured deadline.
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    /// Underlying git2 error.
    #[error("git error: {0}")]
    Git2(#[from] git2::Error),
}
