//! Result and error types for Hallar.
//!
//! Two layers: [`HallarError`] for conditions that abort a call (hard window
//! failure, strict verification, I/O), and [`BackendFailure`] for the expected
//! ways a single recognition backend comes up empty. Backend failures are
//! values, never errors: the orchestrator reads them and moves on.

use thiserror::Error;

/// Result type for Hallar operations
pub type HallarResult<T> = Result<T, HallarError>;

/// Errors that can occur in Hallar
#[derive(Debug, Error)]
pub enum HallarError {
    /// No usable target window within the time budget
    #[error("Target window unavailable after {waited_ms}ms (titles: {titles})")]
    WindowUnavailable {
        /// Configured title patterns
        titles: String,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Caller-requested existence check timed out
    #[error(
        "Element '{target}' not found within {waited_ms}ms after {attempts} backend attempt(s): {detail}"
    )]
    StrictVerificationFailure {
        /// Asset id or label that was searched for
        target: String,
        /// Time spent searching
        waited_ms: u64,
        /// Number of backend attempts made
        attempts: usize,
        /// Last backend failure seen
        detail: String,
    },

    /// Screen capture failed
    #[error("Screen capture failed: {message}")]
    Capture {
        /// Error message
        message: String,
    },

    /// Pointer injection failed
    #[error("Input simulation failed: {message}")]
    Input {
        /// Error message
        message: String,
    },

    /// Region with non-positive size or otherwise unusable
    #[error("Invalid region: {message}")]
    InvalidRegion {
        /// Error message
        message: String,
    },

    /// Request that cannot be executed as built
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Image encoding or decoding failed
    #[error("Image processing failed: {message}")]
    ImageProcessing {
        /// Error message
        message: String,
    },

    /// OCR engine failed to run or returned unreadable output
    #[error("OCR error: {0}")]
    Ocr(#[from] rusty_tesseract::TessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HallarError {
    /// Create a capture error
    #[must_use]
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// Create an input error
    #[must_use]
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a config error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid region error
    #[must_use]
    pub fn invalid_region(message: impl Into<String>) -> Self {
        Self::InvalidRegion {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

/// Why one backend attempt produced no usable point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendFailure {
    /// Reference image or required input absent; the backend is skipped
    #[error("asset missing: {0}")]
    AssetMissing(String),

    /// Engine failed to initialise or is disabled; cached, never retried
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend ran but found nothing above its threshold
    #[error("no match: {0}")]
    NoMatch(String),

    /// Backend produced an implausible coordinate
    #[error("coordinate out of bounds: {0}")]
    OutOfBounds(String),
}

impl BackendFailure {
    /// Create a no-match failure
    #[must_use]
    pub fn no_match(detail: impl Into<String>) -> Self {
        Self::NoMatch(detail.into())
    }

    /// Whether this failure counts as the backend having actually run
    #[must_use]
    pub const fn backend_ran(&self) -> bool {
        matches!(self, Self::NoMatch(_) | Self::OutOfBounds(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_failure_message_is_descriptive() {
        let err = HallarError::StrictVerificationFailure {
            target: "login_button".to_string(),
            waited_ms: 3000,
            attempts: 12,
            detail: "no match: best 0.41 < 0.70".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("login_button"));
        assert!(msg.contains("3000ms"));
        assert!(msg.contains("12 backend attempt(s)"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HallarError = io.into();
        assert!(matches!(err, HallarError::Io(_)));
    }

    #[test]
    fn test_backend_ran() {
        assert!(BackendFailure::no_match("x").backend_ran());
        assert!(BackendFailure::OutOfBounds("x".into()).backend_ran());
        assert!(!BackendFailure::AssetMissing("x".into()).backend_ran());
        assert!(!BackendFailure::Unavailable("x".into()).backend_ran());
    }
}
