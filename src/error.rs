//! Error handling utilities shared across the crate.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = LmPrepError> = std::result::Result<T, E>;

/// Domain-specific error describing failures during corpus preparation or model building.
#[derive(Debug, Error)]
pub enum LmPrepError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// The corpus produced zero tokens, so no vocabulary can be selected.
    #[error("corpus {path:?} has 0 words, cannot continue")]
    EmptyCorpus {
        /// Corpus the counts were taken from.
        path: PathBuf,
    },
    /// An external tool could not be started.
    #[error("failed to launch {tool}: {source}")]
    ToolLaunch {
        /// Name of the tool that failed to start.
        tool: String,
        /// Error returned while spawning or feeding the process.
        source: std::io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}")]
    ToolFailed {
        /// Name of the tool that failed.
        tool: String,
        /// Exit status reported by the operating system.
        status: ExitStatus,
    },
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Catch-all variant for invariants that should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for LmPrepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl LmPrepError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }

    /// Returns true when the error signals a corpus without any tokens.
    #[must_use]
    pub fn is_empty_corpus(&self) -> bool {
        matches!(self, Self::EmptyCorpus { .. })
    }
}
