//! Storage error types.

use std::borrow::Cow;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Storage error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No object exists at the requested key.
    #[error("object '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    /// The backend failed for any other reason.
    #[error("storage error: {message}")]
    Storage {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// The store could not be constructed from its configuration.
    #[error("invalid storage configuration: {0}")]
    Config(Cow<'static, str>),
}

impl Error {
    /// Creates a storage error with a message.
    pub fn storage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error with a message and source.
    pub fn storage_with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Converts a backend error, naming the bucket and key on a miss.
    pub(crate) fn from_object_store(err: object_store::Error, bucket: &str, key: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            },
            other => Self::storage_with_source(other.to_string(), other),
        }
    }

    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
