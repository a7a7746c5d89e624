use thiserror::Error;

/// Unified application error.
///
/// Every fallible layer (config, network, parsing, state storage, delivery)
/// maps into this so the binary can fail in a predictable way.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl AppError {
    pub fn storage(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Errors from calendar page sources.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Body decode error: {message}")]
    DecodeError { message: String },
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Network(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
