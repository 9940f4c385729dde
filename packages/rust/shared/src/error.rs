//! Error types for paper-discussion.
//!
//! Library crates use [`PaperDiscError`] via `thiserror`.
//! The coordinator classifies failures into [`RunError`] by the stage that
//! produced them; the CLI maps those to exit codes.

use std::path::PathBuf;

/// Top-level error type for all library operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperDiscError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while reading the CSV source or querying arXiv.
    #[error("network error: {0}")]
    Network(String),

    /// CSV, Atom feed, or state record parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or state store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperDiscError>;

impl PaperDiscError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failed run, classified by the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The fetch/process step failed. The checkpoint is unchanged and the
    /// next trigger retries from it.
    #[error("processing failed: {0}")]
    Processing(PaperDiscError),

    /// The checkpoint (or lease) could not be read or written.
    #[error("state store failed: {0}")]
    StateStore(PaperDiscError),

    /// Invalid override or missing external configuration; raised before
    /// any processing begins.
    #[error("configuration invalid: {0}")]
    Configuration(PaperDiscError),
}

impl RunError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Processing(_) | Self::Configuration(_) => 1,
            Self::StateStore(_) => 2,
        }
    }

    /// Short, stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Processing(_) => "processing",
            Self::StateStore(_) => "state_store",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PaperDiscError::config("missing template");
        assert_eq!(err.to_string(), "config error: missing template");

        let err = PaperDiscError::validation("schemaVersion 99 not supported");
        assert!(err.to_string().contains("schemaVersion 99"));
    }

    #[test]
    fn run_error_exit_codes() {
        assert_eq!(RunError::Processing(PaperDiscError::Network("down".into())).exit_code(), 1);
        assert_eq!(RunError::Configuration(PaperDiscError::config("x")).exit_code(), 1);
        assert_eq!(RunError::StateStore(PaperDiscError::Storage("disk".into())).exit_code(), 2);
    }

    #[test]
    fn run_error_wraps_message() {
        let err = RunError::StateStore(PaperDiscError::Storage("disk full".into()));
        assert_eq!(err.to_string(), "state store failed: storage error: disk full");
        assert_eq!(err.kind(), "state_store");
    }
}
