//! Error types for the cms-engine crate.

use cms_config::EntryError;
use cms_reader::ReaderError;
use cms_scanner::ScanError;
use cms_watcher::WatchError;

/// Errors surfaced by the engine to its host.
///
/// Failures inside a reparse cycle never travel this way; they become
/// [`HostEvent::ErrorOccurred`](crate::HostEvent::ErrorOccurred). This type
/// covers setup and host commands that cannot be carried out.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The reader failed outside a cycle.
    #[error(transparent)]
    Reader(#[from] ReaderError),

    /// The scanner failed outside a cycle.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The directory watcher could not be set up.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// A configuration edit was rejected.
    #[error(transparent)]
    Config(#[from] EntryError),

    /// No build configuration with this id is known.
    #[error("unknown build configuration '{0}'")]
    UnknownConfiguration(String),

    /// The engine was created without any build configuration.
    #[error("no build configuration to parse")]
    NoConfiguration,

    /// The engine task is gone.
    #[error("engine channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// Returns `true` if the host can retry the command later.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Reader(e) => e.is_recoverable(),
            Self::Scan(e) => e.is_recoverable(),
            Self::Watch(_) | Self::Config(_) => true,
            Self::UnknownConfiguration(_) | Self::NoConfiguration | Self::ChannelClosed => false,
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for EngineError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
