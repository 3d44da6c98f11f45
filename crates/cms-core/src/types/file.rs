//! Project file nodes.
//!
//! A [`FileNode`] is one file of the published project tree. Nodes come from
//! two independent producers, the external tool's reply and the filesystem
//! scanner; the reconciler merges them by path.

use std::cmp::Ordering;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Classification of a project file.
///
/// # Examples
///
/// ```
/// use cms_core::FileType;
/// use camino::Utf8Path;
///
/// assert_eq!(FileType::from_path(Utf8Path::new("src/main.cpp")), FileType::Source);
/// assert_eq!(FileType::from_path(Utf8Path::new("CMakeLists.txt")), FileType::ProjectFile);
/// assert_eq!(FileType::from_path(Utf8Path::new("README")), FileType::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FileType {
    /// Compilable source (`.c`, `.cpp`, `.cu`, ...).
    Source,
    /// Header (`.h`, `.hpp`, ...).
    Header,
    /// Resource collection (`.qrc`, `.rc`).
    Resource,
    /// Designer form (`.ui`).
    UiForm,
    /// Build-description file (`CMakeLists.txt`, `*.cmake`).
    ProjectFile,
    /// Declarative UI source (`.qml`).
    Qml,
    /// Anything else.
    #[default]
    Unknown,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "cp", "m", "mm", "cu", "s", "S", "asm",
];
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "h++", "inl", "tcc", "cuh"];

impl FileType {
    /// Classifies a path by its file name and extension.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Self {
        let Some(name) = path.file_name() else {
            return Self::Unknown;
        };
        if name == "CMakeLists.txt" {
            return Self::ProjectFile;
        }
        match path.extension() {
            Some("cmake") => Self::ProjectFile,
            Some(ext) if SOURCE_EXTENSIONS.contains(&ext) => Self::Source,
            Some(ext) if HEADER_EXTENSIONS.contains(&ext) => Self::Header,
            Some("qrc" | "rc") => Self::Resource,
            Some("ui") => Self::UiForm,
            Some("qml") => Self::Qml,
            _ => Self::Unknown,
        }
    }

    /// Returns a short lowercase label.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Header => "header",
            Self::Resource => "resource",
            Self::UiForm => "form",
            Self::ProjectFile => "project",
            Self::Qml => "qml",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single file in the project model.
///
/// Nodes order by path only, which is what the sorted-merge algorithms of
/// the reconciler rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNode {
    /// Absolute path of the file.
    pub path: Utf8PathBuf,
    /// Classification of the file.
    pub file_type: FileType,
    /// Whether the file is produced by the build rather than authored.
    pub is_generated: bool,
}

impl FileNode {
    /// Creates a node that is not generated.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, file_type: FileType) -> Self {
        Self {
            path: path.into(),
            file_type,
            is_generated: false,
        }
    }

    /// Creates a node and classifies it from its path.
    #[must_use]
    pub fn classified(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let file_type = FileType::from_path(&path);
        Self::new(path, file_type)
    }

    /// Sets the generated flag.
    #[inline]
    #[must_use]
    pub const fn with_generated(mut self, generated: bool) -> Self {
        self.is_generated = generated;
        self
    }

    /// Returns `true` if this is a `CMakeLists.txt` file.
    #[must_use]
    pub fn is_lists_file(&self) -> bool {
        self.path.file_name() == Some("CMakeLists.txt")
    }

    /// Compares two nodes by path.
    #[inline]
    #[must_use]
    pub fn cmp_path(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

/// Sorts nodes by path and drops later duplicates of the same path.
///
/// The first occurrence of each path wins, so callers put the list whose
/// classification should take precedence first.
pub fn sort_and_dedup(nodes: &mut Vec<FileNode>) {
    nodes.sort_by(FileNode::cmp_path);
    nodes.dedup_by(|later, earlier| later.path == earlier.path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(FileType::from_path(Utf8Path::new("a/b.cxx")), FileType::Source);
        assert_eq!(FileType::from_path(Utf8Path::new("a/b.hpp")), FileType::Header);
        assert_eq!(FileType::from_path(Utf8Path::new("res.qrc")), FileType::Resource);
        assert_eq!(FileType::from_path(Utf8Path::new("dlg.ui")), FileType::UiForm);
        assert_eq!(FileType::from_path(Utf8Path::new("main.qml")), FileType::Qml);
        assert_eq!(
            FileType::from_path(Utf8Path::new("cmake/Find.cmake")),
            FileType::ProjectFile
        );
        assert_eq!(FileType::from_path(Utf8Path::new("LICENSE")), FileType::Unknown);
    }

    #[test]
    fn test_sort_and_dedup_keeps_first() {
        let mut nodes = vec![
            FileNode::new("/p/b.cpp", FileType::Source).with_generated(true),
            FileNode::new("/p/a.cpp", FileType::Source),
            FileNode::new("/p/b.cpp", FileType::Unknown),
        ];
        sort_and_dedup(&mut nodes);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].path, "/p/b.cpp");
        assert!(nodes[1].is_generated);
    }

    #[test]
    fn test_is_lists_file() {
        assert!(FileNode::classified("/p/CMakeLists.txt").is_lists_file());
        assert!(!FileNode::classified("/p/CMakeLists.txt.user").is_lists_file());
    }

    #[test]
    fn test_file_type_serialization() {
        assert_eq!(serde_json::to_string(&FileType::UiForm).unwrap(), r#""ui_form""#);
    }
}
