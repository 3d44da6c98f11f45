//! Error types for the cms-reader crate.
//!
//! Every failure of a parse cycle is a [`ReaderError`]. None of them is fatal
//! to the process; the orchestrator only needs to know which
//! [`ErrorClass`] a failure belongs to.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Coarse classification of a reader failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retrying later may succeed.
    Transient,
    /// The tool ran and reported a problem with the project.
    ToolReported,
    /// The tool's reply or protocol could not be understood.
    Protocol,
    /// The cycle cannot succeed until the parameters change.
    FatalToCycle,
}

/// Errors that can occur while running the tool or reading its reply.
///
/// # Examples
///
/// ```
/// use cms_reader::{ErrorClass, ReaderError};
///
/// let err = ReaderError::exited(2);
/// assert_eq!(err.to_string(), "CMake returned error code: 2");
/// assert_eq!(err.kind(), ErrorClass::ToolReported);
/// assert!(!err.is_fatal());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The tool executable could not be started.
    #[error("failed to start {program}: {source}")]
    ToolNotFound {
        /// The program that was looked up.
        program: Utf8PathBuf,
        /// The spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited with a nonzero status.
    #[error("CMake returned error code: {code}")]
    ToolExitedNonZero {
        /// The exit code.
        code: i32,
    },

    /// The tool was terminated by a signal.
    #[error("CMake process crashed")]
    ToolCrashed,

    /// The tool did not finish in time and was killed.
    #[error("CMake process timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The parse was stopped.
    #[error("parse cancelled")]
    Cancelled,

    /// No reply index was found after the run.
    #[error("no reply index found in {0}")]
    ReplyMissing(Utf8PathBuf),

    /// A reply file exists but could not be understood.
    #[error("malformed reply {path}: {message}")]
    ReplyMalformed {
        /// The offending file.
        path: Utf8PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// The server reported an error for a request.
    #[error("{0}")]
    ServerError(String),

    /// An I/O error outside the tool process.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being accessed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ReaderError {
    /// Creates a new [`ReaderError::ToolNotFound`] error.
    #[inline]
    pub fn tool_not_found(program: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::ToolNotFound {
            program: program.into(),
            source,
        }
    }

    /// Creates a new [`ReaderError::ToolExitedNonZero`] error.
    #[inline]
    pub const fn exited(code: i32) -> Self {
        Self::ToolExitedNonZero { code }
    }

    /// Creates a new [`ReaderError::ReplyMalformed`] error.
    #[inline]
    pub fn malformed(path: impl Into<Utf8PathBuf>, message: impl ToString) -> Self {
        Self::ReplyMalformed {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates a new [`ReaderError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorClass {
        match self {
            Self::ToolNotFound { .. } => ErrorClass::FatalToCycle,
            Self::ToolExitedNonZero { .. } | Self::ToolCrashed | Self::ServerError(_) => {
                ErrorClass::ToolReported
            }
            Self::ReplyMissing(_) | Self::ReplyMalformed { .. } => ErrorClass::Protocol,
            Self::Timeout(_) | Self::Cancelled | Self::Io { .. } => ErrorClass::Transient,
        }
    }

    /// Returns `true` if automatic retries should stop until the
    /// parameters change.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorClass::FatalToCycle)
    }

    /// Returns `true` if a later cycle may succeed without user action.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorClass::Transient)
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::ToolNotFound { program, .. } => Some(program),
            Self::ReplyMissing(path) | Self::ReplyMalformed { path, .. } | Self::Io { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}
