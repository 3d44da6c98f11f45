//! Directory watching and rescan throttling for cmake-sync.
//!
//! # Overview
//!
//! - [`DirectoryWatcher`]: one non-recursive watch per scanned directory
//!   plus the project root, debounced by `notify-debouncer-mini` and
//!   streamed to tokio as [`FileEventBatch`]es
//! - [`FileFilter`]: predicates run on the watcher thread
//!   ([`ProjectFilter`] keeps the build tree and hidden paths out)
//! - [`Throttle`]: the trailing-edge window that keeps edit bursts from
//!   turning into rescan storms
//!
//! Whether a change actually needs a rescan is decided by comparing
//! directory listings; see `cms_scanner::DirectoryListingCache`.
//!
//! # Usage
//!
//! ```no_run
//! use cms_watcher::{DirectoryWatcher, ProjectFilter, Throttle};
//! use cms_core::WatchConfig;
//! use camino::Utf8Path;
//! use std::time::{Duration, Instant};
//!
//! # async fn example() -> Result<(), cms_watcher::WatchError> {
//! let root = Utf8Path::new("/p");
//! let mut watcher = DirectoryWatcher::new(
//!     root,
//!     Vec::new(),
//!     &WatchConfig::default(),
//!     ProjectFilter::new(root),
//! )?;
//! let mut throttle = Throttle::new(Duration::from_millis(4500));
//!
//! while let Some(_batch) = watcher.recv().await {
//!     let due = throttle.trigger(Instant::now()).deadline();
//!     tokio::time::sleep_until(due.into()).await;
//!     if throttle.poll(Instant::now()) {
//!         // rescan
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod filter;
pub mod throttle;
pub mod watcher;

pub use error::WatchError;
pub use events::{EventBatchStats, FileEvent, FileEventBatch};
pub use filter::{AcceptAllFilter, CompositeFilter, FileFilter, ProjectFilter};
pub use throttle::{Throttle, ThrottleDecision};
pub use watcher::DirectoryWatcher;
