//! Error types for a conversion run.

use std::path::PathBuf;
use thiserror::Error;

/// Run-scoped errors. Every variant is fatal and maps to exit status 1.
#[derive(Debug, Error)]
pub enum RunError {
    /// Bad arguments or option values.
    #[error("configuration error: {0}")]
    Config(String),

    /// A precondition for starting the run does not hold.
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// Discovery could not produce a work set.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl RunError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn preflight(reason: impl Into<String>) -> Self {
        Self::Preflight(reason.into())
    }
}

/// Errors raised while enumerating the source tree.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("source directory does not exist: {path}")]
    RootMissing { path: PathBuf },

    #[error("source directory is not readable: {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no eligible audio files found under {path}")]
    NoEligibleFiles { path: PathBuf },

    #[error("{path} is not under source root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Errors that can occur while converting a single item.
///
/// These never abort the run: the item is marked failed and processing
/// continues with the rest of the work set.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The codec engine binary could not be started.
    #[error("codec engine not found: {path}")]
    EngineNotFound { path: PathBuf },

    /// Target directory could not be created.
    #[error("failed to create output directory {path}: {source}")]
    OutputDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but reported failure.
    #[error("encode failed: {reason}")]
    EncodeFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Probing a file failed before a verdict could be reached.
    #[error("probe failed: {reason}")]
    ProbeFailed { reason: String },

    /// Previous corrupt output could not be removed.
    #[error("failed to remove stale output {path}: {source}")]
    StaleOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source timestamp could not be copied to the output.
    #[error("failed to preserve timestamps on {path}: {source}")]
    Timestamp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted while this item was in flight.
    #[error("interrupted")]
    Cancelled,
}

impl ConversionError {
    pub fn encode_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
            stderr,
        }
    }

    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
