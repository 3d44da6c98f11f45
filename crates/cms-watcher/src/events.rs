//! Event types for directory change notifications.
//!
//! The debouncer reports every path touched during its window. The watcher
//! forwards each window as one [`FileEventBatch`]; the engine then asks the
//! batch which directories changed and runs the differential listing check
//! on those.
//!
//! # Event Flow
//!
//! ```text
//! Directory change
//!        │
//!        ▼
//! notify-debouncer-mini (100ms debounce)
//!        │
//!        ▼
//!   FileEventBatch (one per debounce window)
//!        │
//!        ▼
//!   Engine: directories() ──► listing check ──► throttled rescan
//! ```

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A change reported for one path.
///
/// The debouncer does not distinguish create, modify and delete; neither
/// does this type.
///
/// # Examples
///
/// ```
/// use cms_watcher::FileEvent;
/// use camino::Utf8PathBuf;
///
/// let event = FileEvent::new(Utf8PathBuf::from("/p/src/CMakeLists.txt"));
/// assert_eq!(event.directory().map(|d| d.as_str()), Some("/p/src"));
/// assert!(event.is_project_file());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The path that changed.
    pub path: Utf8PathBuf,

    /// When the event was received.
    pub timestamp: Instant,
}

impl FileEvent {
    /// Creates an event stamped now.
    #[inline]
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            timestamp: Instant::now(),
        }
    }

    /// Creates an event with a specific timestamp.
    #[inline]
    #[must_use]
    pub const fn with_timestamp(path: Utf8PathBuf, timestamp: Instant) -> Self {
        Self { path, timestamp }
    }

    /// Returns the file name, if any.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    /// Returns the directory containing the changed path.
    #[inline]
    #[must_use]
    pub fn directory(&self) -> Option<&Utf8Path> {
        self.path.parent()
    }

    /// Returns `true` for build-description files (`CMakeLists.txt`,
    /// `*.cmake`).
    #[must_use]
    pub fn is_project_file(&self) -> bool {
        self.file_name() == Some("CMakeLists.txt") || self.path.extension() == Some("cmake")
    }
}

/// The events of one debounce window.
///
/// Uses [`SmallVec`] with inline storage for up to 8 events; a single save
/// rarely touches more.
///
/// # Examples
///
/// ```
/// use cms_watcher::{FileEvent, FileEventBatch};
/// use camino::Utf8PathBuf;
///
/// let batch: FileEventBatch = [
///     FileEvent::new(Utf8PathBuf::from("/p/src/a.cpp")),
///     FileEvent::new(Utf8PathBuf::from("/p/src/b.cpp")),
///     FileEvent::new(Utf8PathBuf::from("/p/include/a.h")),
/// ]
/// .into_iter()
/// .collect();
///
/// assert_eq!(batch.len(), 3);
/// let dirs: Vec<_> = batch.directories().into_iter().map(|d| d.as_str()).collect();
/// assert_eq!(dirs, ["/p/include", "/p/src"]);
/// ```
#[derive(Debug, Clone)]
pub struct FileEventBatch {
    /// The events in arrival order.
    pub events: SmallVec<[FileEvent; 8]>,

    /// When the batch was created.
    pub received_at: Instant,
}

impl FileEventBatch {
    /// Creates an empty batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: SmallVec::new(),
            received_at: Instant::now(),
        }
    }

    /// Creates a batch from events.
    #[inline]
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = FileEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            received_at: Instant::now(),
        }
    }

    /// Adds an event.
    #[inline]
    pub fn push(&mut self, event: FileEvent) {
        self.events.push(event);
    }

    /// Returns the number of events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch contains no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns an iterator over the events.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FileEvent> {
        self.events.iter()
    }

    /// Returns the events touching build-description files.
    #[inline]
    pub fn project_file_events(&self) -> impl Iterator<Item = &FileEvent> {
        self.events.iter().filter(|e| e.is_project_file())
    }

    /// Returns the unique changed paths, sorted.
    #[must_use]
    pub fn unique_paths(&self) -> Vec<&Utf8Path> {
        let mut paths: Vec<&Utf8Path> = self.events.iter().map(|e| e.path.as_path()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// Returns the unique directories containing a changed path, sorted.
    #[must_use]
    pub fn directories(&self) -> Vec<&Utf8Path> {
        let mut dirs: Vec<&Utf8Path> = self.events.iter().filter_map(FileEvent::directory).collect();
        dirs.sort_unstable();
        dirs.dedup();
        dirs
    }
}

impl Default for FileEventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for FileEventBatch {
    type Item = FileEvent;
    type IntoIter = smallvec::IntoIter<[FileEvent; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileEventBatch {
    type Item = &'a FileEvent;
    type IntoIter = std::slice::Iter<'a, FileEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<FileEvent> for FileEventBatch {
    fn from_iter<T: IntoIterator<Item = FileEvent>>(iter: T) -> Self {
        Self::from_events(iter)
    }
}

/// Summary of one batch, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatchStats {
    /// Total number of events.
    pub total_events: usize,

    /// Events touching build-description files.
    pub project_file_events: usize,

    /// Number of unique paths.
    pub unique_files: usize,

    /// Number of unique directories.
    pub directories: usize,
}

impl EventBatchStats {
    /// Computes the summary of `batch`.
    #[must_use]
    pub fn from_batch(batch: &FileEventBatch) -> Self {
        Self {
            total_events: batch.len(),
            project_file_events: batch.project_file_events().count(),
            unique_files: batch.unique_paths().len(),
            directories: batch.directories().len(),
        }
    }
}
