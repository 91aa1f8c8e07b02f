//! [`Error`], [`ErrorKind`] and [`Result`].

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::handler::response::ErrorResponse;

/// Tracing target for errors surfaced by handlers.
const TRACING_TARGET: &str = "vip_server::handler::error";

/// The error type for HTTP handlers.
#[derive(Clone)]
#[must_use = "errors do nothing unless serialized"]
pub struct Error<'a> {
    kind: ErrorKind,
    message: Option<Cow<'a, str>>,
    context: Option<Cow<'a, str>>,
}

impl Error<'static> {
    /// Creates a new [`Error`] with the specified kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: None,
        }
    }
}

impl<'a> Error<'a> {
    /// Attaches context about the failing request.
    #[inline]
    pub fn with_context(self, context: impl Into<Cow<'a, str>>) -> Self {
        Self {
            context: Some(context.into()),
            ..self
        }
    }

    /// Sets a custom client-facing message.
    #[inline]
    pub fn with_message(self, message: impl Into<Cow<'a, str>>) -> Self {
        Self {
            message: Some(message.into()),
            ..self
        }
    }

    /// Returns the error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context if present.
    #[inline]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the custom message if present.
    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl Default for Error<'static> {
    #[inline]
    fn default() -> Self {
        Self::new(ErrorKind::default())
    }
}

impl fmt::Debug for Error<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("status", &self.kind.status_code())
            .field("message", &self.message)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for Error<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let response = self.kind.response();
        let message = self.message.as_deref().unwrap_or(&response.message);
        write!(f, "{} ({}): {}", response.name, response.status, message)?;
        if let Some(ref context) = self.context {
            write!(f, " - {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error<'_> {}

impl IntoResponse for Error<'_> {
    fn into_response(self) -> Response {
        let mut response = self.kind.response();
        if let Some(message) = self.message {
            response = response.with_message(message);
        }
        if let Some(context) = self.context {
            response = response.with_context(context);
        }
        response.into_response()
    }
}

impl From<ErrorKind> for Error<'static> {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<vip_core::Error> for Error<'static> {
    fn from(err: vip_core::Error) -> Self {
        let kind = match err {
            vip_core::Error::InvalidKey(_) => ErrorKind::BadRequest,
            vip_core::Error::UnsupportedFormat { .. } => ErrorKind::UnsupportedMediaType,
            vip_core::Error::Decode { .. } => ErrorKind::UnprocessableEntity,
            _ => ErrorKind::InternalServerError,
        };
        Self::new(kind).with_context(err.to_string())
    }
}

impl From<vip_cache::Error> for Error<'static> {
    fn from(err: vip_cache::Error) -> Self {
        let kind = match err.kind() {
            vip_cache::ErrorKind::NotFound => ErrorKind::NotFound,
            vip_cache::ErrorKind::UnsupportedFormat => ErrorKind::UnsupportedMediaType,
            vip_cache::ErrorKind::Decode => ErrorKind::UnprocessableEntity,
            vip_cache::ErrorKind::Timeout => ErrorKind::GatewayTimeout,
            vip_cache::ErrorKind::Internal => {
                tracing::error!(target: TRACING_TARGET, error = %err, "derivative lookup failed");
                ErrorKind::InternalServerError
            }
        };
        Self::new(kind).with_context(err.to_string())
    }
}

impl From<vip_worker::Error> for Error<'static> {
    fn from(err: vip_worker::Error) -> Self {
        Self::new(ErrorKind::ServiceUnavailable).with_context(err.to_string())
    }
}

/// A specialized [`Result`] type for HTTP handlers.
///
/// [`Result`]: std::result::Result
pub type Result<T, E = Error<'static>> = std::result::Result<T, E>;

/// Every HTTP error the public surface produces.
#[must_use = "error kinds do nothing unless used to create errors"]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // 4xx Client Errors
    /// 400 Bad Request - Invalid bucket or image id
    BadRequest,
    /// 404 Not Found - Original or route absent
    NotFound,
    /// 415 Unsupported Media Type - Image format cannot be transformed
    UnsupportedMediaType,
    /// 422 Unprocessable Entity - Image bytes are malformed
    UnprocessableEntity,

    // 5xx Server Errors
    /// 500 Internal Server Error - Unexpected server error
    #[default]
    InternalServerError,
    /// 503 Service Unavailable - Job queue closed
    ServiceUnavailable,
    /// 504 Gateway Timeout - A stage exceeded its time budget
    GatewayTimeout,
}

impl ErrorKind {
    /// Converts this error kind into a full [`Error`].
    #[inline]
    pub fn into_error(self) -> Error<'static> {
        Error::new(self)
    }

    /// Creates an [`Error`] with the specified context.
    #[inline]
    pub fn with_context<'a>(self, context: impl Into<Cow<'a, str>>) -> Error<'a> {
        Error::new(self).with_context(context)
    }

    /// Creates an [`Error`] with the specified message.
    #[inline]
    pub fn with_message<'a>(self, message: impl Into<Cow<'a, str>>) -> Error<'a> {
        Error::new(self).with_message(message)
    }

    /// Returns the HTTP status code for this error kind.
    #[inline]
    pub fn status_code(self) -> StatusCode {
        self.response().status
    }

    /// Returns the response template for this error kind.
    #[inline]
    pub fn response(self) -> ErrorResponse<'static> {
        match self {
            Self::BadRequest => ErrorResponse::BAD_REQUEST,
            Self::NotFound => ErrorResponse::NOT_FOUND,
            Self::UnsupportedMediaType => ErrorResponse::UNSUPPORTED_MEDIA_TYPE,
            Self::UnprocessableEntity => ErrorResponse::UNPROCESSABLE_ENTITY,
            Self::InternalServerError => ErrorResponse::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => ErrorResponse::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout => ErrorResponse::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response().name)
    }
}

impl IntoResponse for ErrorKind {
    #[inline]
    fn into_response(self) -> Response {
        self.response().into_response()
    }
}
