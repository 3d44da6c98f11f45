//! Filesystem tree scanner for cmake-sync.
//!
//! The scanner recovers the files the build tool does not report (glob
//! sources, documentation, scripts) so the project tree can show them.
//!
//! # Overview
//!
//! The main entry point is [`Scanner`], which combines:
//!
//! - [`FileWalker`]: depth-first traversal with a symlink hop budget
//! - [`ExcludeRules`]: name-based exclusion of VCS dirs and editor backups
//! - [`BinaryProbeCache`]: content sniffing, cached by content signature
//! - [`DirectoryListingCache`]: listings for the differential rescan check
//! - [`ScanStats`]: atomic counters
//!
//! # Example
//!
//! ```
//! use cms_core::ScanConfig;
//! use cms_scanner::Scanner;
//! use camino::Utf8Path;
//! use tokio_util::sync::CancellationToken;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let root = Utf8Path::from_path(dir.path()).unwrap();
//! std::fs::write(root.join("CMakeLists.txt"), "project(demo)").unwrap();
//! std::fs::write(root.join("main.cpp"), "int main() {}").unwrap();
//!
//! let scanner = Scanner::new(ScanConfig::default());
//! let result = scanner.scan(root, &CancellationToken::new())?;
//! assert_eq!(result.files.len(), 2);
//! # Ok::<(), cms_scanner::ScanError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! Scanner (cheaply cloneable)
//!     │
//!     ├── FileWalker ──► WalkBuilder (ignore crate, standard filters off)
//!     │
//!     ├── BinaryProbeCache (FxHashMap + RwLock)
//!     │
//!     ├── DirectoryListingCache (FxHashMap + RwLock)
//!     │
//!     └── ScanStats (atomic counters)
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod error;
mod filter;
mod listing;
mod probe;
mod stats;
mod walker;

pub use error::ScanError;
pub use filter::{ExcludeRules, classify, is_generated, is_well_known_binary};
pub use listing::{DirectoryListingCache, directory_entries};
pub use probe::{BinaryProbeCache, ContentSignature, Probe, looks_binary};
pub use stats::{ScanStats, StatsSnapshot};
pub use walker::{DEFAULT_MAX_SYMLINK_HOPS, FileWalker, WalkEntry};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use cms_core::types::file::sort_and_dedup;
use cms_core::{FileNode, FileType, ScanConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A path classifier.
pub type Classifier = Arc<dyn Fn(&Utf8Path) -> FileType + Send + Sync>;

/// Result of one scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Files, sorted by path and unique.
    pub files: Vec<FileNode>,
    /// Directories entered, including the root, sorted.
    pub dirs: Vec<Utf8PathBuf>,
    /// Counters at the end of the scan.
    pub stats: StatsSnapshot,
    /// Non-fatal problems encountered on the way.
    pub errors: Vec<ScanError>,
}

/// The filesystem scanner.
///
/// `Scanner` is cheaply cloneable; clones share the probe cache, the listing
/// cache and the statistics, so a clone can run on a blocking thread while
/// the owner keeps using the caches.
#[derive(Clone)]
pub struct Scanner {
    config: ScanConfig,
    build_dir: Option<Utf8PathBuf>,
    classifier: Classifier,
    probes: Arc<BinaryProbeCache>,
    listings: Arc<DirectoryListingCache>,
    stats: Arc<ScanStats>,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("config", &self.config)
            .field("build_dir", &self.build_dir)
            .field("probes", &self.probes.len())
            .field("listings", &self.listings.len())
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Creates a scanner.
    #[must_use]
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            build_dir: None,
            classifier: Arc::new(classify),
            probes: Arc::default(),
            listings: Arc::default(),
            stats: Arc::default(),
        }
    }

    /// Sets the build directory; files below it are flagged generated.
    #[must_use]
    pub fn with_build_dir(mut self, build_dir: impl Into<Utf8PathBuf>) -> Self {
        self.build_dir = Some(build_dir.into());
        self
    }

    /// Replaces the classification function.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Returns the listing cache filled by the last scan.
    #[inline]
    #[must_use]
    pub fn listings(&self) -> &DirectoryListingCache {
        &self.listings
    }

    /// Returns the probe cache.
    #[inline]
    #[must_use]
    pub fn probes(&self) -> &BinaryProbeCache {
        &self.probes
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Scans `root` on the current thread.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] for a missing root and
    /// [`ScanError::Cancelled`] if `token` fires mid-walk. Other problems
    /// end up in [`ScanResult::errors`].
    pub fn scan(&self, root: &Utf8Path, token: &CancellationToken) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        self.stats.reset();
        self.listings.clear();

        let rules = ExcludeRules::new(&root.join("CMakeLists.txt"))
            .with_skip_dirs(self.config.skip_dirs.as_slice());
        let walker = FileWalker::new(root)?
            .with_rules(rules.clone())
            .with_max_symlink_hops(self.config.max_symlink_hops);

        let mut result = ScanResult::default();
        walker.walk(token, |entry| match entry {
            WalkEntry::Dir(dir) => {
                self.stats.increment_dirs();
                self.listings.record_from_disk(&dir);
                result.dirs.push(dir);
            }
            WalkEntry::File(path) => {
                if let Some(node) = self.accept_file(&rules, path, &mut result.errors) {
                    self.stats.increment_files();
                    result.files.push(node);
                }
            }
            WalkEntry::Error(err) => {
                self.stats.increment_errors();
                result.errors.push(err);
            }
        })?;

        sort_and_dedup(&mut result.files);
        result.dirs.sort();
        result.dirs.dedup();
        result.stats = self.stats.snapshot();

        info!(
            root = %root,
            files = result.files.len(),
            dirs = result.dirs.len(),
            errors = result.errors.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Scan complete"
        );
        Ok(result)
    }

    /// Scans `root` on the blocking thread pool.
    pub async fn scan_async(
        &self,
        root: Utf8PathBuf,
        token: CancellationToken,
    ) -> Result<ScanResult, ScanError> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&root, &token)).await?
    }

    fn accept_file(
        &self,
        rules: &ExcludeRules,
        path: Utf8PathBuf,
        errors: &mut Vec<ScanError>,
    ) -> Option<FileNode> {
        if rules.is_excluded_file(&path) {
            self.stats.increment_excluded();
            return None;
        }
        if is_well_known_binary(&path) {
            self.stats.increment_binary();
            return None;
        }

        let file_type = (self.classifier)(&path);
        // Known source types are never probed.
        if self.config.sniff_binary && file_type == FileType::Unknown {
            match self.probes.probe(&path, self.config.sniff_bytes) {
                Ok(probe) => {
                    if probe.cached {
                        self.stats.increment_probe_hits();
                    }
                    if probe.is_binary {
                        debug!(path = %path, "Dropping binary file");
                        self.stats.increment_binary();
                        return None;
                    }
                }
                Err(err) => {
                    self.stats.increment_errors();
                    errors.push(err);
                }
            }
        }

        let generated = is_generated(&path, self.build_dir.as_deref());
        Some(FileNode::new(path, file_type).with_generated(generated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        std::fs::write(root.join("CMakeLists.txt"), "project(demo)\n").unwrap();
        std::fs::write(root.join("CMakeLists.txt.user"), "<xml/>").unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.cpp"), "int main() {}\n").unwrap();
        std::fs::write(root.join("src/main.cpp~"), "backup").unwrap();
        std::fs::write(root.join("src/moc_window.cpp"), "// moc\n").unwrap();
        std::fs::write(root.join("README"), "text\n").unwrap();
        std::fs::write(root.join("blob"), b"\x00\x01binary").unwrap();
        std::fs::write(root.join("logo.png"), b"\x89PNG").unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config"), "").unwrap();
        (dir, root)
    }

    #[test]
    fn test_scan_filters_and_classifies() {
        let (_dir, root) = project();
        let scanner = Scanner::new(ScanConfig::default());
        let result = scanner.scan(&root, &CancellationToken::new()).unwrap();

        let names: Vec<_> = result
            .files
            .iter()
            .map(|f| f.path.strip_prefix(&root).unwrap().as_str())
            .collect();
        assert_eq!(
            names,
            ["CMakeLists.txt", "README", "src/main.cpp", "src/moc_window.cpp"]
        );
        assert_eq!(result.files[0].file_type, FileType::ProjectFile);
        assert_eq!(result.files[2].file_type, FileType::Source);
        assert!(result.files[3].is_generated);
        assert_eq!(result.dirs, [root.clone(), root.join("src")]);

        assert_eq!(result.stats.files, 4);
        assert_eq!(result.stats.binary, 2);
        assert_eq!(result.stats.excluded, 2);
    }

    #[test]
    fn test_scan_records_listings() {
        let (_dir, root) = project();
        let scanner = Scanner::new(ScanConfig::default());
        scanner.scan(&root, &CancellationToken::new()).unwrap();

        assert!(!scanner.listings().needs_rescan_from_disk(&root.join("src")));
        std::fs::write(root.join("src/extra.cpp"), "").unwrap();
        assert!(scanner.listings().needs_rescan_from_disk(&root.join("src")));
    }

    #[test]
    fn test_build_dir_files_are_generated() {
        let (_dir, root) = project();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::write(root.join("build/config.h"), "#define X 1\n").unwrap();

        let scanner = Scanner::new(ScanConfig::default()).with_build_dir(root.join("build"));
        let result = scanner.scan(&root, &CancellationToken::new()).unwrap();
        let header = result
            .files
            .iter()
            .find(|f| f.path.ends_with("build/config.h"))
            .unwrap();
        assert!(header.is_generated);
    }

    #[test]
    fn test_custom_classifier() {
        let (_dir, root) = project();
        let scanner = Scanner::new(ScanConfig::default())
            .with_classifier(Arc::new(|_: &Utf8Path| FileType::Resource));
        let result = scanner.scan(&root, &CancellationToken::new()).unwrap();
        assert!(result.files.iter().all(|f| f.file_type == FileType::Resource));
    }

    #[test]
    fn test_probe_cache_reused_across_scans() {
        let (_dir, root) = project();
        std::fs::write(root.join("dump1.dat"), b"\0core").unwrap();
        std::fs::write(root.join("dump2.dat"), b"\0core").unwrap();
        let scanner = Scanner::new(ScanConfig::default());
        let first = scanner.scan(&root, &CancellationToken::new()).unwrap();
        assert_eq!(first.stats.probe_hits, 1);
        let second = scanner.scan(&root, &CancellationToken::new()).unwrap();
        assert_eq!(second.stats.probe_hits, 2);
        assert_eq!(second.stats.binary, 4);
    }

    #[tokio::test]
    async fn test_scan_async_cancelled() {
        let (_dir, root) = project();
        let token = CancellationToken::new();
        token.cancel();
        let err = Scanner::new(ScanConfig::default())
            .scan_async(root, token)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }
}
