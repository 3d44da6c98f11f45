//! Per-directory listings for the differential rescan check.
//!
//! After a scan, the listing of every visited directory is cached. When a
//! watch reports a change in a directory, its current listing is compared
//! against the cached one; a full rescan is only needed if they differ.
//! Content edits to existing files leave the listing unchanged.

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Returns the sorted entry names of `dir`.
///
/// Unreadable directories and non-UTF-8 names yield an empty or partial
/// listing.
#[must_use]
pub fn directory_entries(dir: &Utf8Path) -> Vec<String> {
    let Ok(read_dir) = dir.read_dir_utf8() else {
        return Vec::new();
    };
    let mut names: Vec<String> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_owned())
        .collect();
    names.sort_unstable();
    names
}

/// Cache of directory listings from the last scan.
///
/// # Examples
///
/// ```
/// use cms_scanner::DirectoryListingCache;
/// use camino::Utf8Path;
///
/// let cache = DirectoryListingCache::new();
/// let dir = Utf8Path::new("/p/src");
/// cache.record(dir, vec!["a.cpp".into(), "b.cpp".into()]);
///
/// assert!(!cache.needs_rescan(dir, &["a.cpp".into(), "b.cpp".into()]));
/// assert!(cache.needs_rescan(dir, &["a.cpp".into()]));
/// assert!(cache.needs_rescan(Utf8Path::new("/p/other"), &[]));
/// ```
#[derive(Debug, Default)]
pub struct DirectoryListingCache {
    listings: RwLock<FxHashMap<Utf8PathBuf, Vec<String>>>,
}

impl DirectoryListingCache {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the listing of `dir`; `entries` is sorted first.
    pub fn record(&self, dir: &Utf8Path, mut entries: Vec<String>) {
        entries.sort_unstable();
        self.listings.write().insert(dir.to_owned(), entries);
    }

    /// Reads and stores the listing of `dir`.
    pub fn record_from_disk(&self, dir: &Utf8Path) {
        self.record(dir, directory_entries(dir));
    }

    /// Returns `true` if `current` (sorted) differs from the cached listing,
    /// or nothing is cached for `dir`.
    #[must_use]
    pub fn needs_rescan(&self, dir: &Utf8Path, current: &[String]) -> bool {
        self.listings
            .read()
            .get(dir)
            .is_none_or(|cached| cached.as_slice() != current)
    }

    /// Compares `dir` on disk against the cached listing.
    #[must_use]
    pub fn needs_rescan_from_disk(&self, dir: &Utf8Path) -> bool {
        self.needs_rescan(dir, &directory_entries(dir))
    }

    /// Returns the cached directories.
    #[must_use]
    pub fn directories(&self) -> Vec<Utf8PathBuf> {
        self.listings.read().keys().cloned().collect()
    }

    /// Returns the number of cached directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listings.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listings.read().is_empty()
    }

    /// Drops every listing.
    pub fn clear(&self) {
        self.listings.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_edit_needs_no_rescan() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("a.cpp"), "int a;").unwrap();

        let cache = DirectoryListingCache::new();
        cache.record_from_disk(root);
        std::fs::write(root.join("a.cpp"), "int a = 1;").unwrap();
        assert!(!cache.needs_rescan_from_disk(root));

        std::fs::write(root.join("b.cpp"), "int b;").unwrap();
        assert!(cache.needs_rescan_from_disk(root));
    }

    #[test]
    fn test_directory_entries_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("z.h"), "").unwrap();
        std::fs::create_dir(root.join("m")).unwrap();
        std::fs::write(root.join("a.h"), "").unwrap();
        assert_eq!(directory_entries(root), ["a.h", "m", "z.h"]);
        assert!(directory_entries(&root.join("missing")).is_empty());
    }
}
