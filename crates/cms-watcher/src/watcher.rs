//! Per-directory watcher with async event streaming.
//!
//! [`DirectoryWatcher`] bridges the synchronous `notify` debouncer to tokio.
//! Every directory the scanner visited gets its own non-recursive watch, so
//! excluded directories (VCS metadata, the build tree) never produce events.
//! After each rescan the engine hands the new directory set over with
//! [`DirectoryWatcher::watch_directories`]; the watcher thread diffs it
//! against the installed watches.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 Blocking Thread (spawn_blocking)               │
//! │  ┌──────────────────┐   ┌────────────────┐   ┌─────────────┐  │
//! │  │ RecommendedWatcher│ ->│ Debouncer      │ ->│ Callback    │  │
//! │  │ (one watch / dir)│   │ (100ms window) │   │ (filtering) │  │
//! │  └────────▲─────────┘   └────────────────┘   └──────┬──────┘  │
//! │           │ watch / unwatch                          │         │
//! │  ┌────────┴─────────┐                                │         │
//! │  │ command loop     │◄── WatchCommand                │         │
//! │  └──────────────────┘                                │         │
//! └──────────────────────────────────────────────────────│─────────┘
//!                                          blocking_send │
//!                                                        ▼
//!                         mpsc::Receiver<FileEventBatch> ──► Engine
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cms_core::WatchConfig;

use crate::error::WatchError;
use crate::events::{FileEvent, FileEventBatch};
use crate::filter::FileFilter;

/// Default channel capacity for event batches.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Commands for the blocking watcher thread.
#[derive(Debug)]
enum WatchCommand {
    /// Replace the watched directory set.
    Directories(Vec<Utf8PathBuf>),
    /// Stop watching and return.
    Shutdown,
}

/// Watches a project root and a set of directories below it.
///
/// # Lifecycle
///
/// 1. **Creation**: `DirectoryWatcher::new()` validates the root and spawns
///    a blocking task owning the debouncer.
/// 2. **Events**: [`recv`](Self::recv) yields one [`FileEventBatch`] per
///    debounce window, already filtered.
/// 3. **Shutdown**: [`shutdown`](Self::shutdown) stops the thread and
///    reports its result; dropping the watcher only signals it.
///
/// # Examples
///
/// ```no_run
/// use cms_watcher::{DirectoryWatcher, ProjectFilter};
/// use cms_core::WatchConfig;
/// use camino::{Utf8Path, Utf8PathBuf};
///
/// # async fn example() -> Result<(), cms_watcher::WatchError> {
/// let root = Utf8Path::new("/p");
/// let dirs = vec![Utf8PathBuf::from("/p/src")];
/// let mut watcher = DirectoryWatcher::new(
///     root,
///     dirs,
///     &WatchConfig::default(),
///     ProjectFilter::new(root).with_build_dir("/p/build"),
/// )?;
///
/// while let Some(batch) = watcher.recv().await {
///     for dir in batch.directories() {
///         println!("changed: {dir}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct DirectoryWatcher {
    commands: mpsc::UnboundedSender<WatchCommand>,
    task_handle: Option<JoinHandle<Result<(), WatchError>>>,
    event_rx: mpsc::Receiver<FileEventBatch>,
    root: Utf8PathBuf,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("root", &self.root)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// Starts watching `root` and every directory in `dirs`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if `root` doesn't exist. Failing
    /// to watch the root itself surfaces from [`shutdown`](Self::shutdown);
    /// failing to watch any other directory is logged and skipped.
    pub fn new<F: FileFilter>(
        root: &Utf8Path,
        dirs: impl IntoIterator<Item = Utf8PathBuf>,
        config: &WatchConfig,
        filter: F,
    ) -> Result<Self, WatchError> {
        Self::with_capacity(root, dirs, config, filter, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Like [`new`](Self::new), with a custom event channel capacity.
    pub fn with_capacity<F: FileFilter>(
        root: &Utf8Path,
        dirs: impl IntoIterator<Item = Utf8PathBuf>,
        config: &WatchConfig,
        filter: F,
        channel_capacity: usize,
    ) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::path_not_found(root));
        }

        let (event_tx, event_rx) = mpsc::channel(channel_capacity);
        let (commands, command_rx) = mpsc::unbounded_channel();
        // The initial set travels as the first command.
        commands
            .send(WatchCommand::Directories(dirs.into_iter().collect()))
            .map_err(|_| WatchError::ChannelClosed)?;

        let task_root = root.to_owned();
        let debounce = config.debounce();
        let recursive = config.recursive;
        let task_handle = tokio::task::spawn_blocking(move || {
            run_watcher_loop(&task_root, debounce, recursive, event_tx, command_rx, filter)
        });

        Ok(Self {
            commands,
            task_handle: Some(task_handle),
            event_rx,
            root: root.to_owned(),
        })
    }

    /// Replaces the watched directory set. The root stays watched.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the watcher thread is gone.
    pub fn watch_directories(
        &self,
        dirs: impl IntoIterator<Item = Utf8PathBuf>,
    ) -> Result<(), WatchError> {
        self.commands
            .send(WatchCommand::Directories(dirs.into_iter().collect()))
            .map_err(|_| WatchError::ChannelClosed)
    }

    /// Receives the next batch. Returns `None` once the watcher stopped.
    pub async fn recv(&mut self) -> Option<FileEventBatch> {
        self.event_rx.recv().await
    }

    /// Receives a batch without waiting.
    pub fn try_recv(&mut self) -> Result<FileEventBatch, mpsc::error::TryRecvError> {
        self.event_rx.try_recv()
    }

    /// Returns the event receiver, for use in `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::Receiver<FileEventBatch> {
        &mut self.event_rx
    }

    /// Returns the project root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns `true` while the watcher thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed() && self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the watcher thread and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the thread, or
    /// [`WatchError::ChannelClosed`] if it panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        let _ = self.commands.send(WatchCommand::Shutdown);
        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => result?,
                Err(_join_error) => return Err(WatchError::ChannelClosed),
            }
        }
        Ok(())
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        // The task stops once it sees the command; Drop can't await it.
        let _ = self.commands.send(WatchCommand::Shutdown);
    }
}

/// Converts one debounce window into a filtered batch.
fn collect_batch<F: FileFilter>(
    events: Vec<notify_debouncer_mini::DebouncedEvent>,
    filter: &F,
) -> FileEventBatch {
    let mut batch = FileEventBatch::new();
    for event in events {
        let path = match Utf8PathBuf::try_from(event.path) {
            Ok(p) => p,
            Err(e) => {
                let err = WatchError::non_utf8_path(e.into_path_buf());
                tracing::warn!(error = %err, "Skipping file event");
                continue;
            }
        };
        if !filter.should_process(&path) {
            tracing::trace!(path = %path, "Filtered out file event");
            continue;
        }
        batch.push(FileEvent::new(path));
    }
    batch
}

/// Brings the installed watches in line with `wanted`.
fn apply_directories(
    debouncer: &mut Debouncer<notify::RecommendedWatcher>,
    root: &Utf8Path,
    watched: &mut BTreeSet<Utf8PathBuf>,
    wanted: Vec<Utf8PathBuf>,
) {
    let wanted: BTreeSet<Utf8PathBuf> = wanted.into_iter().filter(|d| d != root).collect();

    for dir in watched.difference(&wanted) {
        if let Err(err) = debouncer.watcher().unwatch(dir.as_std_path()) {
            tracing::debug!(path = %dir, error = %err, "Failed to remove watch");
        }
    }
    let mut added = 0usize;
    for dir in wanted.difference(watched) {
        match debouncer
            .watcher()
            .watch(dir.as_std_path(), RecursiveMode::NonRecursive)
        {
            Ok(()) => added += 1,
            Err(err) => tracing::warn!(path = %dir, error = %err, "Failed to watch directory"),
        }
    }

    tracing::debug!(directories = wanted.len(), added, "Watch set updated");
    *watched = wanted;
}

#[allow(clippy::needless_pass_by_value)] // Owned by the blocking task
fn run_watcher_loop<F: FileFilter>(
    root: &Utf8Path,
    debounce: Duration,
    recursive: bool,
    event_tx: mpsc::Sender<FileEventBatch>,
    mut command_rx: mpsc::UnboundedReceiver<WatchCommand>,
    filter: F,
) -> Result<(), WatchError> {
    let tx = event_tx;
    let mut debouncer: Debouncer<notify::RecommendedWatcher> =
        new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let batch = collect_batch(events, &filter);
                if batch.is_empty() {
                    return;
                }
                if tx.blocking_send(batch).is_err() {
                    tracing::debug!("Event channel closed, dropping batch");
                }
            }
            Err(error) => tracing::warn!(error = %error, "Debouncer error"),
        })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    debouncer.watcher().watch(root.as_std_path(), mode)?;
    tracing::info!(path = %root, recursive, "Directory watcher started");

    let mut watched = BTreeSet::new();
    while let Some(command) = command_rx.blocking_recv() {
        match command {
            // A recursive root watch already covers every directory.
            WatchCommand::Directories(_) if recursive => {}
            WatchCommand::Directories(dirs) => {
                apply_directories(&mut debouncer, root, &mut watched, dirs);
            }
            WatchCommand::Shutdown => break,
        }
    }

    tracing::info!(path = %root, "Directory watcher stopped");
    Ok(())
}
