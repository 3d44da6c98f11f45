//! Error types for the cms-scanner crate.
//!
//! This module provides the [`ScanError`] type for errors that can occur
//! while walking the project directory.

use camino::Utf8PathBuf;

/// Errors that can occur during scanning.
///
/// # Error Recovery Strategy
///
/// - **Walker errors** ([`ScanError::Walk`]): logged and skipped, except for
///   the root itself
/// - **Read errors** ([`ScanError::Read`]): the file is kept unprobed
/// - **Cancellation** ([`ScanError::Cancelled`]): the whole scan is dropped
///
/// # Examples
///
/// ```
/// use cms_scanner::ScanError;
///
/// fn describe(err: &ScanError) -> &'static str {
///     match err {
///         ScanError::Walk(_) => "walk",
///         ScanError::Read { .. } => "read",
///         ScanError::Config(_) => "config",
///         ScanError::NonUtf8Path(_) => "encoding",
///         ScanError::Cancelled => "cancelled",
///         ScanError::Task(_) => "task",
///     }
/// }
/// assert_eq!(describe(&ScanError::Cancelled), "cancelled");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Failed to walk a directory.
    #[error("failed to walk directory: {0}")]
    Walk(#[from] ignore::Error),

    /// Failed to read a file while probing its content.
    #[error("failed to read file {path}: {source}")]
    Read {
        /// The path of the file that couldn't be read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid scanner configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// The scan was cancelled before it finished.
    #[error("scan cancelled")]
    Cancelled,

    /// The blocking scan task panicked or was aborted.
    #[error("scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScanError {
    /// Creates a new [`ScanError::Read`] error.
    #[inline]
    pub fn read(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`ScanError::Config`] error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` if this error is recoverable (scanning can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Read { .. } | Self::Walk(_) | Self::NonUtf8Path(_)
        )
    }

    /// Returns `true` if this error ends the scan.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Read { path, .. } => Some(path),
            Self::Walk(_)
            | Self::Config(_)
            | Self::NonUtf8Path(_)
            | Self::Cancelled
            | Self::Task(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_scan_error_read() {
        let err = ScanError::read(
            "src/blob.bin",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_recoverable());
        assert_eq!(err.path().map(|p| p.as_str()), Some("src/blob.bin"));
        assert!(err.to_string().contains("src/blob.bin"));
    }

    #[test]
    fn test_scan_error_config() {
        let err = ScanError::config("root path does not exist: /nope");
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        assert_eq!(
            err.to_string(),
            "invalid configuration: root path does not exist: /nope"
        );
    }

    #[test]
    fn test_scan_error_cancelled() {
        assert!(ScanError::Cancelled.is_fatal());
        assert_eq!(ScanError::Cancelled.to_string(), "scan cancelled");
    }

    #[test]
    fn test_scan_error_non_utf8() {
        let err = ScanError::NonUtf8Path(std::path::PathBuf::from("test"));
        assert!(err.is_recoverable());
        assert!(err.path().is_none());
    }
}
