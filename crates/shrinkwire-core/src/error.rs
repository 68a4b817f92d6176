//! Error types for Shrinkwire

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Shrinkwire
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// Malformed or semantically invalid protocol header
    #[error("Invalid HTTP header: {0}")]
    InvalidHeader(String),

    /// Remote answered a probe with a non-success status
    #[error("Unexpected response status {0}")]
    UnsuccessfulStatus(http::StatusCode),

    /// Bandwidth probe could not produce a measurement
    #[error("Bandwidth probe failed: {0}")]
    ProbeFailed(String),

    /// Connection to the remote host failed
    #[error("Failed to connect to {0}")]
    Connection(String),

    /// Codec failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// No provider registered under the encoding name
    #[error("No compression provider for encoding '{0}'")]
    UnknownEncoding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP builder error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::InvalidHeader(_) => StatusCode::BAD_REQUEST,
            Error::Hyper(_) | Error::Connection(_) | Error::UnsuccessfulStatus(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error was caused by a malformed client header
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::InvalidHeader(_))
    }

    /// Create an invalid header error
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Error::InvalidHeader(message.into())
    }
}
