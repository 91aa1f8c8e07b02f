//! Error types for key parsing and image transforms.

use std::borrow::Cow;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while addressing or transforming images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The image decoded fine but its format is not one we can re-encode.
    #[error("unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    /// The bytes could not be decoded as an image.
    #[error("failed to decode image: {message}")]
    Decode {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// The transformed image could not be encoded.
    #[error("failed to encode image: {message}")]
    Encode {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// A bucket, image id, or cache key is malformed.
    #[error("invalid derivative key: {0}")]
    InvalidKey(Cow<'static, str>),
}

impl Error {
    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a decode error from an underlying codec error.
    pub fn decode(source: image::ImageError) -> Self {
        Self::Decode {
            message: source.to_string().into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an encode error from an underlying codec error.
    pub fn encode(source: image::ImageError) -> Self {
        Self::Encode {
            message: source.to_string().into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidKey(message.into())
    }
}
