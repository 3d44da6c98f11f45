//! Scan statistics with atomic counters.
//!
//! [`ScanStats`] is updated from the walking thread while other tasks may
//! read it; [`StatsSnapshot`] is the copyable view handed out in results.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for one scanner.
///
/// Counters use relaxed ordering; they are informational only.
///
/// # Examples
///
/// ```
/// use cms_scanner::ScanStats;
///
/// let stats = ScanStats::new();
/// stats.increment_files();
/// stats.increment_excluded();
///
/// let snap = stats.snapshot();
/// assert_eq!(snap.files, 1);
/// assert_eq!(snap.visited(), 2);
/// ```
#[derive(Debug, Default)]
pub struct ScanStats {
    files: AtomicU64,
    dirs: AtomicU64,
    excluded: AtomicU64,
    binary: AtomicU64,
    probe_hits: AtomicU64,
    errors: AtomicU64,
}

impl ScanStats {
    /// Creates a new [`ScanStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a file that made it into the result.
    #[inline]
    pub fn increment_files(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a directory that was entered.
    #[inline]
    pub fn increment_dirs(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a file dropped by the exclusion predicate.
    #[inline]
    pub fn increment_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a file dropped because its content is binary.
    #[inline]
    pub fn increment_binary(&self) {
        self.binary.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a binary probe answered from the cache.
    #[inline]
    pub fn increment_probe_hits(&self) {
        self.probe_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an entry that could not be read.
    #[inline]
    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            dirs: self.dirs.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            binary: self.binary.load(Ordering::Relaxed),
            probe_hits: self.probe_hits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.files.store(0, Ordering::Relaxed);
        self.dirs.store(0, Ordering::Relaxed);
        self.excluded.store(0, Ordering::Relaxed);
        self.binary.store(0, Ordering::Relaxed);
        self.probe_hits.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Files kept.
    pub files: u64,
    /// Directories entered.
    pub dirs: u64,
    /// Files dropped by name.
    pub excluded: u64,
    /// Files dropped as binary.
    pub binary: u64,
    /// Binary probes answered from the cache.
    pub probe_hits: u64,
    /// Unreadable entries.
    pub errors: u64,
}

impl StatsSnapshot {
    /// Returns the number of file entries looked at.
    #[inline]
    #[must_use]
    pub const fn visited(&self) -> u64 {
        self.files + self.excluded + self.binary
    }
}
