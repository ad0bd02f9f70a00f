use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error shape returned by the API and handed to consumers of a failed request.
#[derive(Error, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[error("{message} (status {status_code})")]
pub struct CustomError {
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Server returned an error: {0}")]
    Status(CustomError),
    #[error("Failed to decode response body (status {status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// HTTP status of the failed exchange, if a response was received at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::InvalidUrl(_) => None,
            FetchError::Transport(err) => err.status().map(|s| s.as_u16()),
            FetchError::Status(custom) => Some(custom.status_code),
            FetchError::Decode { status, .. } => Some(*status),
        }
    }

    /// Flattens any failure into the `{message, statusCode}` shape. Failures without a
    /// response use status code 0.
    pub fn to_custom_error(&self) -> CustomError {
        match self {
            FetchError::Status(custom) => custom.clone(),
            other => CustomError {
                message: other.to_string(),
                status_code: other.status_code().unwrap_or(0),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[source] envy::Error),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
}
