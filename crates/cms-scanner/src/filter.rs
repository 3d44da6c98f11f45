//! Exclusion predicate, classification and generated-file heuristics.

use camino::{Utf8Path, Utf8PathBuf};
use cms_core::FileType;

/// Directories never entered, besides every dot-directory.
const SKIP_DIRECTORIES: &[&str] = &["CVS", "_darcs", "{arch}", "SCCS", "RCS"];

/// Extensions of files known to be binary without probing.
const BINARY_EXTENSIONS: &[&str] = &[
    "o", "obj", "a", "lib", "so", "dll", "dylib", "exe", "pdb", "ilk", "pch", "gch", "qm",
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "icns", "webp", "pdf", "zip", "gz", "tgz",
    "bz2", "xz", "7z", "tar", "jar", "class", "pyc",
];

/// Exclusion rules applied by name, before any content is read.
///
/// # Examples
///
/// ```
/// use cms_scanner::ExcludeRules;
/// use camino::Utf8Path;
///
/// let rules = ExcludeRules::new(Utf8Path::new("/p/CMakeLists.txt"));
/// assert!(rules.is_excluded_dir_name(".git"));
/// assert!(rules.is_excluded_file(Utf8Path::new("/p/main.cpp~")));
/// assert!(rules.is_excluded_file(Utf8Path::new("/p/CMakeLists.txt.user.4.10")));
/// assert!(!rules.is_excluded_file(Utf8Path::new("/p/main.cpp")));
/// ```
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    project_file: Utf8PathBuf,
    skip_dirs: Vec<String>,
}

impl ExcludeRules {
    /// Creates rules for a project whose top-level build file is
    /// `project_file`.
    #[must_use]
    pub fn new(project_file: &Utf8Path) -> Self {
        Self {
            project_file: project_file.to_owned(),
            skip_dirs: Vec::new(),
        }
    }

    /// Adds directory names to skip.
    #[must_use]
    pub fn with_skip_dirs<S: AsRef<str>>(mut self, dirs: &[S]) -> Self {
        self.skip_dirs
            .extend(dirs.iter().map(|d| d.as_ref().to_owned()));
        self
    }

    /// Returns `true` for directory names the walk must not enter.
    #[must_use]
    pub fn is_excluded_dir_name(&self, name: &str) -> bool {
        name.starts_with('.')
            || SKIP_DIRECTORIES.contains(&name)
            || self.skip_dirs.iter().any(|d| d == name)
    }

    /// Returns `true` for files dropped by name: hidden files, editor
    /// backups and the IDE's per-user project settings.
    #[must_use]
    pub fn is_excluded_file(&self, path: &Utf8Path) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };
        if name.starts_with('.') || name.ends_with('~') {
            return true;
        }
        if Utf8Path::new(name)
            .extension()
            .is_some_and(|ext| matches!(ext, "orig" | "rej" | "autosave" | "swp"))
        {
            return true;
        }
        path.as_str()
            .strip_prefix(self.project_file.as_str())
            .is_some_and(|rest| rest.starts_with(".user"))
    }
}

/// Returns `true` if the extension names a well-known binary format.
#[must_use]
pub fn is_well_known_binary(path: &Utf8Path) -> bool {
    path.extension().is_some_and(|ext| {
        let ext = ext.to_ascii_lowercase();
        BINARY_EXTENSIONS.contains(&ext.as_str())
    })
}

/// Default classification: by file name and extension.
#[inline]
#[must_use]
pub fn classify(path: &Utf8Path) -> FileType {
    FileType::from_path(path)
}

/// Returns `true` for files the build produces rather than the user
/// authors: moc, uic and rcc outputs, and anything under `build_dir`.
///
/// # Examples
///
/// ```
/// use cms_scanner::is_generated;
/// use camino::Utf8Path;
///
/// assert!(is_generated(Utf8Path::new("/p/moc_window.cpp"), None));
/// assert!(is_generated(Utf8Path::new("/p/build/x.cpp"), Some(Utf8Path::new("/p/build"))));
/// assert!(!is_generated(Utf8Path::new("/p/window.cpp"), None));
/// ```
#[must_use]
pub fn is_generated(path: &Utf8Path, build_dir: Option<&Utf8Path>) -> bool {
    if build_dir.is_some_and(|dir| path.starts_with(dir)) {
        return true;
    }
    let Some(name) = path.file_name() else {
        return false;
    };
    let stem_ext = Utf8Path::new(name).extension();
    (name.starts_with("moc_") && matches!(stem_ext, Some("cpp")))
        || (name.starts_with("ui_") && matches!(stem_ext, Some("h")))
        || (name.starts_with("qrc_") && matches!(stem_ext, Some("cpp")))
        || matches!(stem_ext, Some("moc"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_exclusion() {
        let rules = ExcludeRules::new(Utf8Path::new("/p/CMakeLists.txt")).with_skip_dirs(&["third_party"]);
        assert!(rules.is_excluded_dir_name(".svn"));
        assert!(rules.is_excluded_dir_name("CVS"));
        assert!(rules.is_excluded_dir_name("third_party"));
        assert!(!rules.is_excluded_dir_name("src"));
    }

    #[test]
    fn test_file_exclusion() {
        let rules = ExcludeRules::new(Utf8Path::new("/p/CMakeLists.txt"));
        assert!(rules.is_excluded_file(Utf8Path::new("/p/.clang-format")));
        assert!(rules.is_excluded_file(Utf8Path::new("/p/a.cpp.orig")));
        assert!(rules.is_excluded_file(Utf8Path::new("/p/a.cpp.autosave")));
        assert!(rules.is_excluded_file(Utf8Path::new("/p/CMakeLists.txt.user")));
        assert!(!rules.is_excluded_file(Utf8Path::new("/p/CMakeLists.txt")));
        assert!(!rules.is_excluded_file(Utf8Path::new("/p/sub/CMakeLists.txt")));
    }

    #[test]
    fn test_well_known_binary() {
        assert!(is_well_known_binary(Utf8Path::new("icon.PNG")));
        assert!(is_well_known_binary(Utf8Path::new("libfoo.so")));
        assert!(!is_well_known_binary(Utf8Path::new("foo.cpp")));
        assert!(!is_well_known_binary(Utf8Path::new("Makefile")));
    }

    #[test]
    fn test_generated_heuristics() {
        assert!(is_generated(Utf8Path::new("/p/ui_dialog.h"), None));
        assert!(is_generated(Utf8Path::new("/p/qrc_res.cpp"), None));
        assert!(is_generated(Utf8Path::new("/p/main.moc"), None));
        assert!(!is_generated(Utf8Path::new("/p/ui_dialog.cpp"), None));
        assert!(!is_generated(Utf8Path::new("/p/src/x.cpp"), Some(Utf8Path::new("/p/build"))));
    }
}
