//! Error types for the cms-config crate.

use camino::Utf8PathBuf;

/// Errors raised while reading cache entries.
///
/// Malformed lines and unknown type strings are not errors: they are skipped
/// or mapped to [`ConfigType::Uninitialized`](crate::ConfigType::Uninitialized).
///
/// # Examples
///
/// ```
/// use cms_config::EntryError;
///
/// let err = EntryError::unknown_key("CMAKE_BUILD_TYPE");
/// assert!(err.is_recoverable());
/// assert!(err.path().is_none());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// The cache file could not be read.
    #[error("failed to open {path} for reading: {source}")]
    Io {
        /// The cache file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An edit referenced a key the model does not hold.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// An edit was rejected because the entry cannot be changed.
    #[error("entry '{key}' cannot be edited: {reason}")]
    NotEditable {
        /// The entry key.
        key: String,
        /// Why the edit was refused.
        reason: String,
    },
}

impl EntryError {
    /// Creates a new [`EntryError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`EntryError::UnknownKey`] error.
    #[inline]
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey(key.into())
    }

    /// Creates a new [`EntryError::NotEditable`] error.
    #[inline]
    pub fn not_editable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotEditable {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the model is left unchanged and usable.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownKey(_) | Self::NotEditable { .. })
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::UnknownKey(_) | Self::NotEditable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_has_path() {
        let err = EntryError::io(
            "/build/CMakeCache.txt",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(!err.is_recoverable());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/build/CMakeCache.txt"));
        assert!(err.to_string().contains("CMakeCache.txt"));
    }

    #[test]
    fn test_not_editable_display() {
        let err = EntryError::not_editable("CMAKE_ROOT", "internal entry");
        assert_eq!(
            err.to_string(),
            "entry 'CMAKE_ROOT' cannot be edited: internal entry"
        );
    }
}
