//! Error types.
//!
//! Two families live here. [`Error`] covers configuration and lifecycle
//! failures returned by [`Server`](crate::Server) and
//! [`ServerConfigBuilder`](crate::ServerConfigBuilder). Handler failures are
//! plain [`BoxError`]s; [`HttpError`] and [`DeadlineExceeded`] are the two
//! concrete errors the default error encoder knows how to map to a status.

use http::StatusCode;

/// A type-erased error returned by handlers, codecs and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server has no TLS material and can neither serve nor advertise an
    /// endpoint.
    #[error("no TLS configured")]
    NoTls,

    /// The listen address is not of the form `host:port`.
    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: &'static str },

    /// A configuration value read from the environment was malformed.
    #[error("invalid value for {key}: `{value}`")]
    InvalidSetting { key: &'static str, value: String },

    /// The PEM material did not contain a usable certificate chain or key.
    #[error("certificate: {0}")]
    Certificate(String),

    /// `start` was called on a server that has already been stopped.
    #[error("server is stopped and cannot be restarted")]
    Stopped,

    /// `start` was called while the server is already serving.
    #[error("server is already serving")]
    AlreadyServing,

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    #[error("endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error stems from invalid or missing configuration rather
    /// than a runtime failure.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::NoTls
                | Self::InvalidAddress { .. }
                | Self::InvalidSetting { .. }
                | Self::Certificate(_)
                | Self::Tls(_)
                | Self::Endpoint(_)
        )
    }
}

/// A handler error that carries the HTTP status it should be reported with.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The request outlived its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;
