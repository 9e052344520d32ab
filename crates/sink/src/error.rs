use thiserror::Error;

/// Why a patch could not be written.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection, timeout or body-read failure.
    #[error("network error: {0}")]
    Network(String),

    /// The store answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Seconds from a `Retry-After` header, when the store sent one.
        retry_after_secs: Option<u64>,
    },

    #[error("I/O error: {0}")]
    Io(String),

    /// The sink could not be constructed.
    #[error("sink setup failed: {0}")]
    Setup(String),
}

impl SinkError {
    /// Network errors, 429 and 5xx are worth retrying. Other 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Network(_) => true,
            SinkError::Http { status, .. } => *status == 429 || *status >= 500,
            SinkError::Io(_) | SinkError::Setup(_) => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SinkError::Http { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}
