//! Peer topology error types.

use std::borrow::Cow;
use std::net::SocketAddr;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for peer topology operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Peer topology error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The membership query failed.
    #[error("discovery unavailable: {message}")]
    UpstreamUnavailable {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// Dialing or calling a peer's control endpoint failed.
    #[error("peer {peer}: {message}")]
    Transport {
        peer: String,
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// A listener could not be bound.
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The topology cannot be set up as configured.
    #[error("invalid peer configuration: {0}")]
    Config(Cow<'static, str>),
}

impl Error {
    /// Creates an upstream error with a message and source.
    pub fn upstream(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a transport error with a message and optional source.
    pub fn transport(
        peer: impl Into<String>,
        message: impl Into<Cow<'static, str>>,
        source: Option<BoxedError>,
    ) -> Self {
        Self::Transport {
            peer: peer.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config(message.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let peer = err
            .url()
            .and_then(|url| url.host_str())
            .unwrap_or("unknown")
            .to_owned();
        let message = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_status() {
            "unexpected status"
        } else {
            "request failed"
        };
        Self::transport(peer, message, Some(Box::new(err)))
    }
}
