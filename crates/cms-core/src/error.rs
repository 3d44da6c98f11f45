//! Error types for the cms-core crate.
//!
//! This module provides the [`ConfigError`] type for engine configuration
//! loading and validation failures.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use cms_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::MissingDirectory(Utf8PathBuf::from("/some/build"));
/// assert!(error.to_string().contains("/some/build"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The provided path is invalid or malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The invalid path.
        path: Utf8PathBuf,
        /// Explanation of why the path is invalid.
        reason: String,
    },

    /// A required directory does not exist.
    #[error("missing required directory: {0}")]
    MissingDirectory(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::InvalidPath { path, .. } | Self::MissingDirectory(path) => Some(path),
            Self::InvalidOption { .. } | Self::Io(_) | Self::Parse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let error = ConfigError::InvalidPath {
            path: Utf8PathBuf::from("/invalid/build"),
            reason: "not absolute".to_owned(),
        };
        let msg = error.to_string();
        assert!(msg.contains("/invalid/build"));
        assert!(msg.contains("not absolute"));
        assert!(error.path().is_some());
    }

    #[test]
    fn test_invalid_option_display() {
        let error = ConfigError::invalid_option("throttle_ms", "must be positive");
        let msg = error.to_string();
        assert!(msg.contains("throttle_ms"));
        assert!(msg.contains("must be positive"));
        assert!(error.path().is_none());
    }
}
