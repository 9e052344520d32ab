use thiserror::Error;

/// Fatal errors. Per-record problems never surface here; they are collected
/// as [`crate::model::Issue`]s on the run result instead.
#[derive(Debug, Error)]
pub enum LinkageError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (bad radius, inverted tolerance bands, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// A dataset named on the command line or in a feed is not configured.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// Missing required column in a source CSV.
    #[error("dataset '{dataset}': missing column '{column}'")]
    MissingColumn { dataset: String, column: String },

    /// A snapshot or feed file could not be decoded.
    #[error("{path}: {message}")]
    Decode { path: String, message: String },

    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LinkageError {
    fn from(err: std::io::Error) -> Self {
        LinkageError::Io(err.to_string())
    }
}
