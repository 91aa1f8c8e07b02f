//! Cache error types.

use std::borrow::Cow;
use std::time::Duration;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for cache operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced while serving a derivative.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The original the derivative is computed from does not exist.
    #[error("original '{image_id}' not found in bucket '{bucket}'")]
    OriginMissing { bucket: String, image_id: String },

    /// Decoding, transforming, or encoding failed.
    #[error(transparent)]
    Transform(#[from] vip_core::Error),

    /// The store failed.
    #[error(transparent)]
    Storage(#[from] vip_object::Error),

    /// A stage did not finish in time.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The owning peer could not produce the value.
    #[error("peer {peer} failed: {message}")]
    Peer {
        peer: String,
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// The blocking transform task panicked or was cancelled.
    #[error("transform task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Coarse classification used by the HTTP surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The original or object is absent.
    NotFound,
    /// The image format cannot be handled.
    UnsupportedFormat,
    /// The image bytes are malformed.
    Decode,
    /// A stage exceeded its time budget.
    Timeout,
    /// Anything else.
    Internal,
}

impl Error {
    /// Creates a peer error with a message.
    pub fn peer(peer: impl Into<String>, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Peer {
            peer: peer.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a peer error with a message and source.
    pub fn peer_with_source(
        peer: impl Into<String>,
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Peer {
            peer: peer.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OriginMissing { .. } => ErrorKind::NotFound,
            Self::Storage(err) if err.is_not_found() => ErrorKind::NotFound,
            Self::Transform(vip_core::Error::UnsupportedFormat { .. }) => {
                ErrorKind::UnsupportedFormat
            }
            Self::Transform(vip_core::Error::Decode { .. }) => ErrorKind::Decode,
            Self::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the error is final for this request and must be surfaced
    /// as-is rather than retried elsewhere.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::UnsupportedFormat | ErrorKind::Decode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let missing = Error::OriginMissing {
            bucket: "b".into(),
            image_id: "i".into(),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.is_terminal());

        let unsupported = Error::from(vip_core::Error::unsupported_format("webp"));
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedFormat);

        let timeout = Error::Timeout {
            stage: "transform",
            after: Duration::from_secs(1),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(!timeout.is_terminal());

        assert_eq!(Error::peer("http://x", "boom").kind(), ErrorKind::Internal);
    }
}
