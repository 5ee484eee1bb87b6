use coderisk_core::error::ErrorCategory;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{collaborator} request failed: {message}")]
    Request { collaborator: &'static str, message: String, category: ErrorCategory },

    #[error("{collaborator} returned a response this client could not parse: {source}")]
    InvalidResponse { collaborator: &'static str, source: serde_json::Error },

    #[error("rate limit exhausted for {0}")]
    RateLimited(&'static str),
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Request { category, .. } => *category,
            ClientError::InvalidResponse { .. } => ErrorCategory::Permanent,
            ClientError::RateLimited(_) => ErrorCategory::Transient,
        }
    }

    pub fn source_host(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self::Request { collaborator: "source-host", message: message.into(), category }
    }

    pub fn llm(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self::Request { collaborator: "llm", message: message.into(), category }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        let category = if err.is_timeout() || err.is_connect() || err.status().map(|s| s.is_server_error()).unwrap_or(false) {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        };
        Self::Request { collaborator: "http", message: err.to_string(), category }
    }
}
