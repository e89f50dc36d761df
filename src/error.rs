use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("API request failed with status {status} after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Missing required scan parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// HTTP status of a failed API call, if the failure came from the platform.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } | Self::ApiErrorAfterRetries { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
