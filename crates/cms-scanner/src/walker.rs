//! Depth-first directory traversal.
//!
//! [`FileWalker`] drives the `ignore` crate's walker with its standard
//! filters off; the project's own exclusion rules decide what is entered.
//! Symbolic links are followed, but every symlinked directory on the way
//! down costs one hop, and a branch is cut once the hop budget is spent.

use std::path::PathBuf;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;
use crate::filter::ExcludeRules;

/// Default symlink hop budget.
pub const DEFAULT_MAX_SYMLINK_HOPS: u32 = 5;

/// One item produced by the walk.
#[derive(Debug)]
pub enum WalkEntry {
    /// A directory that will be entered (including the root).
    Dir(Utf8PathBuf),
    /// A file; name-based file exclusion is left to the caller.
    File(Utf8PathBuf),
    /// An entry that could not be visited.
    Error(ScanError),
}

/// A walker over one project directory.
///
/// # Examples
///
/// ```
/// use cms_scanner::{FileWalker, WalkEntry};
/// use camino::Utf8Path;
/// use tokio_util::sync::CancellationToken;
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let root = Utf8Path::from_path(dir.path()).unwrap();
/// std::fs::create_dir(root.join(".git")).unwrap();
/// std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
/// std::fs::write(root.join("main.cpp"), "int main() {}").unwrap();
///
/// let mut files = Vec::new();
/// FileWalker::new(root)?.walk(&CancellationToken::new(), |entry| {
///     if let WalkEntry::File(path) = entry {
///         files.push(path);
///     }
/// })?;
/// assert_eq!(files, [root.join("main.cpp")]);
/// # Ok::<(), cms_scanner::ScanError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: Utf8PathBuf,
    rules: ExcludeRules,
    max_symlink_hops: u32,
}

impl FileWalker {
    /// Creates a walker for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] if the root doesn't exist or isn't a
    /// directory.
    pub fn new(root: &Utf8Path) -> Result<Self, ScanError> {
        if !root.exists() {
            return Err(ScanError::config(format!(
                "root path does not exist: {root}"
            )));
        }
        if !root.is_dir() {
            return Err(ScanError::config(format!(
                "root path is not a directory: {root}"
            )));
        }

        Ok(Self {
            root: root.to_owned(),
            rules: ExcludeRules::new(&root.join("CMakeLists.txt")),
            max_symlink_hops: DEFAULT_MAX_SYMLINK_HOPS,
        })
    }

    /// Replaces the exclusion rules.
    #[must_use]
    pub fn with_rules(mut self, rules: ExcludeRules) -> Self {
        self.rules = rules;
        self
    }

    /// Sets the symlink hop budget.
    #[must_use]
    pub const fn with_max_symlink_hops(mut self, hops: u32) -> Self {
        self.max_symlink_hops = hops;
        self
    }

    /// Returns the root directory being walked.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the exclusion rules.
    #[inline]
    #[must_use]
    pub const fn rules(&self) -> &ExcludeRules {
        &self.rules
    }

    /// Walks the tree depth-first, in file-name order, calling `visit` for
    /// every directory entered and every file found.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] as soon as `token` is cancelled.
    /// Per-entry problems are passed to `visit` as [`WalkEntry::Error`].
    pub fn walk(
        &self,
        token: &CancellationToken,
        mut visit: impl FnMut(WalkEntry),
    ) -> Result<(), ScanError> {
        for result in self.build_walker() {
            if token.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable entry");
                    visit(WalkEntry::Error(ScanError::Walk(err)));
                    continue;
                }
            };

            let Some(path) = Utf8Path::from_path(entry.path()) else {
                visit(WalkEntry::Error(ScanError::NonUtf8Path(
                    entry.path().to_owned(),
                )));
                continue;
            };

            match entry.file_type() {
                Some(ft) if ft.is_dir() => visit(WalkEntry::Dir(path.to_owned())),
                Some(ft) if ft.is_file() => visit(WalkEntry::File(path.to_owned())),
                _ => {}
            }
        }
        Ok(())
    }

    fn build_walker(&self) -> ignore::Walk {
        let rules = self.rules.clone();
        let max_hops = self.max_symlink_hops;
        let hops: Arc<Mutex<FxHashMap<PathBuf, u32>>> = Arc::default();

        WalkBuilder::new(&self.root)
            // The engine's own rules replace .gitignore and hidden-file handling
            .standard_filters(false)
            .follow_links(true)
            .threads(1)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return true;
                }
                if entry.depth() == 0 {
                    hops.lock().insert(entry.path().to_owned(), 0);
                    return true;
                }
                if rules.is_excluded_dir_name(&entry.file_name().to_string_lossy()) {
                    return false;
                }

                let mut hops = hops.lock();
                let parent = entry
                    .path()
                    .parent()
                    .and_then(|p| hops.get(p).copied())
                    .unwrap_or(0);
                let own = parent + u32::from(entry.path_is_symlink());
                if own > max_hops {
                    tracing::debug!(
                        path = %entry.path().display(),
                        hops = own,
                        "Symlink hop budget exhausted"
                    );
                    return false;
                }
                hops.insert(entry.path().to_owned(), own);
                true
            })
            .build()
    }
}
