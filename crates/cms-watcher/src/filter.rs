//! Filtering of watch events.
//!
//! Filters run on the blocking watcher thread, before an event reaches the
//! channel. The build directory churns constantly during a build and must
//! never feed back into a rescan; [`ProjectFilter`] takes care of that.
//!
//! # Examples
//!
//! ```
//! use cms_watcher::{FileFilter, ProjectFilter};
//! use camino::Utf8Path;
//!
//! let filter = ProjectFilter::new("/p").with_build_dir("/p/build");
//!
//! assert!(filter.should_process(Utf8Path::new("/p/src/main.cpp")));
//! assert!(!filter.should_process(Utf8Path::new("/p/build/CMakeCache.txt")));
//! assert!(!filter.should_process(Utf8Path::new("/p/.git/index")));
//! ```

use camino::{Utf8Path, Utf8PathBuf};

/// A predicate deciding which changed paths are forwarded.
///
/// Filters must be [`Send`] and [`Sync`] because they are used from the
/// blocking watcher thread, and `'static` to be moved into it.
///
/// # Examples
///
/// ```
/// use cms_watcher::FileFilter;
/// use camino::Utf8Path;
///
/// struct SourcesOnly;
///
/// impl FileFilter for SourcesOnly {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() == Some("cpp")
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if a change at `path` should be forwarded.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// The engine's default filter.
///
/// Rejects paths under the build directory, paths with a hidden component
/// below the project root, and editor swap and backup files.
#[derive(Debug, Clone)]
pub struct ProjectFilter {
    root: Utf8PathBuf,
    build_dir: Option<Utf8PathBuf>,
}

impl ProjectFilter {
    /// Creates a filter for the project rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_dir: None,
        }
    }

    /// Ignores everything below `build_dir`.
    #[must_use]
    pub fn with_build_dir(mut self, build_dir: impl Into<Utf8PathBuf>) -> Self {
        self.build_dir = Some(build_dir.into());
        self
    }

    fn is_hidden(&self, path: &Utf8Path) -> bool {
        // Components above the root are not ours to judge
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .any(|c| c.as_str().starts_with('.') && c.as_str() != "." && c.as_str() != "..")
    }
}

impl FileFilter for ProjectFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        if self.build_dir.as_ref().is_some_and(|dir| path.starts_with(dir)) {
            return false;
        }
        if self.is_hidden(path) {
            return false;
        }
        path.file_name().is_none_or(|name| {
            !(name.ends_with('~')
                || name.ends_with(".swp")
                || name.ends_with(".autosave")
                || name.starts_with(".#"))
        })
    }
}

/// Combines filters with AND logic. An empty composite accepts everything.
///
/// # Examples
///
/// ```
/// use cms_watcher::{CompositeFilter, FileFilter, ProjectFilter};
/// use camino::Utf8Path;
///
/// struct NoThirdParty;
/// impl FileFilter for NoThirdParty {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         !path.as_str().contains("/3rdparty/")
///     }
/// }
///
/// let filter = CompositeFilter::new()
///     .and(ProjectFilter::new("/p"))
///     .and(NoThirdParty);
///
/// assert!(filter.should_process(Utf8Path::new("/p/src/a.cpp")));
/// assert!(!filter.should_process(Utf8Path::new("/p/3rdparty/zlib/z.c")));
/// ```
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Default for CompositeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}
