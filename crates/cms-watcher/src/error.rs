//! Error types for the cms-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while watching project directories.

use camino::Utf8PathBuf;

/// Errors that can occur during directory watching.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): fatal for the root, logged
///   and skipped for any other directory
/// - **Path not found** ([`WatchError::PathNotFound`]): fatal, the root must
///   exist
/// - **Channel closed** ([`WatchError::ChannelClosed`]): fatal
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): the event is skipped
///
/// # Examples
///
/// ```
/// use cms_watcher::WatchError;
///
/// fn describe(err: &WatchError) -> &'static str {
///     match err {
///         WatchError::Notify(_) => "notify",
///         WatchError::PathNotFound(_) => "missing",
///         WatchError::ChannelClosed => "closed",
///         WatchError::NonUtf8Path(_) => "encoding",
///         WatchError::Io(_) => "io",
///     }
/// }
/// assert_eq!(describe(&WatchError::ChannelClosed), "closed");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The project root does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The command or event channel was closed unexpectedly.
    #[error("watcher channel closed unexpectedly")]
    ChannelClosed,

    /// A path in a file event is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if watching can continue after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error stops the watcher.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) => Some(path),
            Self::Notify(_) | Self::ChannelClosed | Self::NonUtf8Path(_) | Self::Io(_) => None,
        }
    }
}
