//! Reader lifecycle state.

use serde::{Deserialize, Serialize};

/// The lifecycle state of one build configuration's parse cycle.
///
/// ```text
/// Idle ──► Scanning ─┐
///     └──► Configuring ─┴──► Extracting ──► Ready ──► Idle
///                                     └──► Error ──► Idle
/// ```
///
/// Scanning and configuring may run concurrently; the state reports
/// `Configuring` while the tool job is in flight and `Scanning` while only
/// the scan is outstanding.
///
/// # Examples
///
/// ```
/// use cms_core::ReaderState;
///
/// assert!(ReaderState::Idle.can_start_cycle());
/// assert!(ReaderState::Error.can_start_cycle());
/// assert!(!ReaderState::Configuring.can_start_cycle());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Waiting for the filesystem scan only.
    Scanning,
    /// Waiting for the tool job (and possibly the scan).
    Configuring,
    /// Both jobs finished; the model is being merged.
    Extracting,
    /// A new model was published.
    Ready,
    /// The cycle failed.
    Error,
}

impl ReaderState {
    /// Returns `true` if a new cycle may start from this state.
    #[inline]
    #[must_use]
    pub const fn can_start_cycle(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    /// Returns `true` while a scan or tool job is outstanding.
    #[inline]
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Scanning | Self::Configuring | Self::Extracting)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Error, Self::Scanning | Self::Configuring)
                | (Self::Configuring, Self::Scanning | Self::Extracting)
                | (Self::Scanning, Self::Extracting)
                | (Self::Extracting, Self::Ready | Self::Error)
                | (_, Self::Idle)
        )
    }

    /// Returns a human-readable label.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Configuring => "configuring",
            Self::Extracting => "extracting",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
