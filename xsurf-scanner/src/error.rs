use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Interaction failed: {0}")]
    Interaction(String),

    #[error("Element {0} is no longer attached to the document")]
    ElementDetached(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// Navigation timeouts leave a partially loaded page that is still worth analyzing.
    pub fn is_navigation_timeout(&self) -> bool {
        matches!(self, ScanError::NavigationTimeout { .. })
    }
}

impl From<chromiumoxide::error::CdpError> for ScanError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScanError::Browser(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
