//! Error types for tether-core.

use std::path::PathBuf;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or refreshing a mirror.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested label matches no branch or tag, locally or on origin.
    #[error("no such label: {0}")]
    NoSuchLabel(String),

    /// No remote URI was configured.
    #[error("remote repository uri is not configured")]
    MissingUri,

    /// A `file:` URI points at a directory without repository metadata.
    #[error("no git repository at {0}")]
    MissingRepository(PathBuf),

    /// Fatal failure while acquiring or updating the local copy.
    #[error("cannot synchronize repository from '{uri}'")]
    Synchronization {
        /// Remote the refresh was talking to.
        uri: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("toml parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Wrap a fatal cause into [`Error::Synchronization`] for `uri`.
    pub(crate) fn sync(
        uri: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Synchronization {
            uri: uri.into(),
            source: source.into(),
        }
    }
}
