//! Error types for studydeck operations.
//!
//! This module defines [`StudyDeckError`], which covers every failure the
//! pipeline can hit: fetching lesson pages, talking to the LLM, TTS and
//! AnkiConnect services, and reading or writing checkpoint files.
//!
//! Errors are classified with [`StudyDeckError::is_transient`], which the
//! retry helper uses to decide whether another attempt is worth making.
//!
//! # Example
//!
//! ```rust
//! use studydeck_core::{StudyDeckError, Result};
//!
//! fn require_text(text: &str) -> Result<&str> {
//!     if text.trim().is_empty() {
//!         return Err(StudyDeckError::EmptyResponse { reason: "blank".to_string() });
//!     }
//!     Ok(text)
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum StudyDeckError {
    /// HTTP request errors from reqwest.
    ///
    /// Network errors, DNS failures, connection resets and body decoding
    /// problems all land here.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request timeout.
    #[error("Request timed out after {timeout} seconds")]
    Timeout { timeout: u64 },

    /// Invalid URL or locator.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTML parsing errors, usually an invalid CSS selector in a page layout.
    #[error("Failed to parse HTML: {0}")]
    HtmlParseError(String),

    /// A page was fetched but one of the required fields was not found.
    #[error("Field '{field}' not found on page")]
    MissingField { field: String },

    /// Two consecutive fetches of the same page disagreed.
    #[error("Fetched content differs between attempts (field '{field}')")]
    FetchMismatch { field: String },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Standard I/O errors for checkpoint and media files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors for checkpoint files and API payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An external API answered with a non-success status.
    #[error("{service} API returned {status}: {message}")]
    Api { service: String, status: u16, message: String },

    /// The model answered without any usable text.
    #[error("Empty response: {reason}")]
    EmptyResponse { reason: String },

    /// The model answered, but not in the expected line grammar or JSON shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Google reported the API as disabled for the project.
    ///
    /// Enabling an API takes a while to propagate, so this is retried.
    #[error("Service disabled: {0}")]
    ServiceDisabled(String),

    /// AnkiConnect returned an `error` for an action.
    #[error("AnkiConnect action '{action}' failed: {message}")]
    AnkiConnect { action: String, message: String },

    /// An operation kept failing until its attempt budget ran out.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { operation: String, attempts: u32, last_error: String },
}

impl StudyDeckError {
    /// Whether another attempt of the same call may succeed.
    ///
    /// Network failures, timeouts, rate limiting, server errors and
    /// malformed model output are transient. Authentication, permission and
    /// request-shape errors are not, and abort the current item at once.
    pub fn is_transient(&self) -> bool {
        match self {
            StudyDeckError::HttpError(_)
            | StudyDeckError::Timeout { .. }
            | StudyDeckError::MissingField { .. }
            | StudyDeckError::FetchMismatch { .. }
            | StudyDeckError::EmptyResponse { .. }
            | StudyDeckError::MalformedResponse(_)
            | StudyDeckError::ServiceDisabled(_) => true,
            StudyDeckError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for StudyDeckError.
pub type Result<T> = std::result::Result<T, StudyDeckError>;
