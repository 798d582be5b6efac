//! Custom error types for scholardock.
//!
//! This module defines the error taxonomy used by the retrieval pipeline and
//! the PDF fetcher. All functions return `Result<T, ScholarError>` instead of
//! using `unwrap()`.

use thiserror::Error;

/// Main error type for scholardock operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum ScholarError {
    /// Bad search input; never retried
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Network failure, timeout or unexpected HTTP status while fetching a page
    #[error("Transport error: {0}")]
    Transport(String),

    /// The source served a bot-verification page instead of results
    #[error("Access challenged by source: {0}")]
    AccessChallenged(String),

    /// A single listing entry could not be extracted
    #[error("Parse anomaly: {0}")]
    ParseAnomaly(String),

    /// Downloaded content is not an acceptable PDF (wrong type or too large)
    #[error("Download rejected: {0}")]
    DownloadRejected(String),

    /// Network failure while downloading a PDF
    #[error("Download failed: {0}")]
    DownloadTransport(String),

    /// Browser automation error (Chrome DevTools)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Selector or pattern compilation error
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl ScholarError {
    /// Whether a download attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScholarError::DownloadTransport(_) | ScholarError::Transport(_) | ScholarError::Network(_)
        )
    }
}

/// Result type alias using `ScholarError`
pub type Result<T> = std::result::Result<T, ScholarError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ScholarError::Parse(msg.to_string()))
    }
}
