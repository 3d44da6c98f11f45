//! The hierarchical project tree.
//!
//! Folders are created on demand relative to the project root and pruned
//! again once their last file is gone. Files outside the root hang under a
//! synthetic [`OTHER_LOCATIONS`] folder, one child per absolute parent
//! directory.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cms_core::FileNode;
use serde::Serialize;

/// Name of the folder collecting files outside the project root.
pub const OTHER_LOCATIONS: &str = "<Other Locations>";

/// A directory node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    /// Display name.
    pub name: String,
    /// Absolute directory. Empty for [`OTHER_LOCATIONS`].
    pub path: Utf8PathBuf,
    /// Subfolders by name.
    pub folders: BTreeMap<String, FolderNode>,
    /// Files directly in this folder, sorted by path.
    pub files: Vec<FileNode>,
}

impl FolderNode {
    fn new(name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the folder holds neither files nor folders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    fn collect(&self, out: &mut Vec<FileNode>) {
        out.extend(self.files.iter().cloned());
        for folder in self.folders.values() {
            folder.collect(out);
        }
    }

    fn count(&self) -> usize {
        self.files.len() + self.folders.values().map(Self::count).sum::<usize>()
    }

    fn remove_in(&mut self, keys: &[String], path: &Utf8Path) -> Option<FileNode> {
        match keys.split_first() {
            None => {
                let index = self
                    .files
                    .binary_search_by(|f| f.path.as_path().cmp(path))
                    .ok()?;
                Some(self.files.remove(index))
            }
            Some((key, rest)) => {
                let child = self.folders.get_mut(key)?;
                let removed = child.remove_in(rest, path)?;
                if child.is_empty() {
                    self.folders.remove(key);
                }
                Some(removed)
            }
        }
    }
}

/// The project tree below one root directory.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use cms_core::{FileNode, FileType};
/// use cms_engine::ProjectTree;
///
/// let mut tree = ProjectTree::new("/p");
/// tree.insert(FileNode::new("/p/src/main.cpp", FileType::Source));
/// assert!(tree.folder(Utf8Path::new("/p/src")).is_some());
///
/// tree.remove(Utf8Path::new("/p/src/main.cpp"));
/// assert!(tree.folder(Utf8Path::new("/p/src")).is_none());
/// assert!(tree.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectTree {
    root: FolderNode,
}

impl ProjectTree {
    /// Creates an empty tree rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        let name = root.file_name().unwrap_or(root.as_str()).to_owned();
        Self {
            root: FolderNode::new(name, root),
        }
    }

    /// Returns the root directory.
    #[inline]
    #[must_use]
    pub fn root_path(&self) -> &Utf8Path {
        &self.root.path
    }

    /// Returns the root folder.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> &FolderNode {
        &self.root
    }

    /// Folder keys leading from the root to the folder holding `path`.
    fn keys_for(&self, path: &Utf8Path) -> Vec<String> {
        let parent = path.parent().unwrap_or(Utf8Path::new(""));
        match parent.strip_prefix(&self.root.path) {
            Ok(relative) => relative.components().map(|c| c.as_str().to_owned()).collect(),
            Err(_) => vec![OTHER_LOCATIONS.to_owned(), parent.to_string()],
        }
    }

    /// Inserts `node`, creating intermediate folders.
    ///
    /// Returns `false` if the path was already present; its node is replaced.
    pub fn insert(&mut self, node: FileNode) -> bool {
        let keys = self.keys_for(&node.path);
        let mut folder = &mut self.root;
        let mut dir = folder.path.clone();
        for (depth, key) in keys.iter().enumerate() {
            let outside = depth == 0 && key == OTHER_LOCATIONS;
            dir = if outside {
                Utf8PathBuf::new()
            } else if depth == 1 && keys[0] == OTHER_LOCATIONS {
                Utf8PathBuf::from(key)
            } else {
                dir.join(key)
            };
            let path = dir.clone();
            folder = folder
                .folders
                .entry(key.clone())
                .or_insert_with(|| FolderNode::new(key.clone(), path));
        }
        match folder.files.binary_search_by(|f| f.cmp_path(&node)) {
            Ok(index) => {
                folder.files[index] = node;
                false
            }
            Err(index) => {
                folder.files.insert(index, node);
                true
            }
        }
    }

    /// Removes the file at `path`, pruning folders left empty. The root is
    /// never pruned.
    pub fn remove(&mut self, path: &Utf8Path) -> Option<FileNode> {
        let keys = self.keys_for(path);
        self.root.remove_in(&keys, path)
    }

    /// Returns the node at `path`.
    #[must_use]
    pub fn get(&self, path: &Utf8Path) -> Option<&FileNode> {
        let keys = self.keys_for(path);
        let mut folder = &self.root;
        for key in &keys {
            folder = folder.folders.get(key)?;
        }
        folder
            .files
            .binary_search_by(|f| f.path.as_path().cmp(path))
            .ok()
            .map(|i| &folder.files[i])
    }

    /// Returns `true` if `path` is in the tree.
    #[must_use]
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.get(path).is_some()
    }

    /// Returns the folder for the directory `dir`.
    #[must_use]
    pub fn folder(&self, dir: &Utf8Path) -> Option<&FolderNode> {
        let keys = self.keys_for(&dir.join("_"));
        let mut folder = &self.root;
        for key in &keys {
            folder = folder.folders.get(key)?;
        }
        Some(folder)
    }

    /// Returns every file, sorted by path.
    #[must_use]
    pub fn files(&self) -> Vec<FileNode> {
        let mut out = Vec::with_capacity(self.len());
        self.root.collect(&mut out);
        out.sort_by(FileNode::cmp_path);
        out
    }

    /// Returns the number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.count()
    }

    /// Returns `true` if the tree holds no file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_core::FileType;

    fn node(path: &str) -> FileNode {
        FileNode::classified(path)
    }

    #[test]
    fn test_insert_creates_folders() {
        let mut tree = ProjectTree::new("/p");
        assert!(tree.insert(node("/p/src/gui/window.cpp")));
        assert!(tree.insert(node("/p/CMakeLists.txt")));

        let gui = tree.folder(Utf8Path::new("/p/src/gui")).unwrap();
        assert_eq!(gui.name, "gui");
        assert_eq!(gui.path, "/p/src/gui");
        assert_eq!(gui.files.len(), 1);
        assert_eq!(tree.root().files.len(), 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut tree = ProjectTree::new("/p");
        tree.insert(node("/p/a.cpp"));
        let generated = FileNode::new("/p/a.cpp", FileType::Source).with_generated(true);
        assert!(!tree.insert(generated));
        assert_eq!(tree.len(), 1);
        assert!(tree.get(Utf8Path::new("/p/a.cpp")).unwrap().is_generated);
    }

    #[test]
    fn test_remove_prunes_to_root() {
        let mut tree = ProjectTree::new("/p");
        tree.insert(node("/p/a/b/c/deep.h"));
        tree.insert(node("/p/a/keep.h"));

        assert!(tree.remove(Utf8Path::new("/p/a/b/c/deep.h")).is_some());
        assert!(tree.folder(Utf8Path::new("/p/a/b")).is_none());
        assert!(tree.folder(Utf8Path::new("/p/a")).is_some());

        tree.remove(Utf8Path::new("/p/a/keep.h"));
        assert!(tree.is_empty());
        assert_eq!(tree.root_path(), "/p");
        assert!(tree.remove(Utf8Path::new("/p/a/keep.h")).is_none());
    }

    #[test]
    fn test_other_locations() {
        let mut tree = ProjectTree::new("/p");
        tree.insert(node("/opt/sdk/cmake/Sdk.cmake"));
        tree.insert(node("/opt/sdk/cmake/Extra.cmake"));

        let other = &tree.root().folders[OTHER_LOCATIONS];
        assert!(other.path.as_str().is_empty());
        let sdk = &other.folders["/opt/sdk/cmake"];
        assert_eq!(sdk.path, "/opt/sdk/cmake");
        assert_eq!(sdk.files.len(), 2);

        tree.remove(Utf8Path::new("/opt/sdk/cmake/Sdk.cmake"));
        tree.remove(Utf8Path::new("/opt/sdk/cmake/Extra.cmake"));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_files_sorted() {
        let mut tree = ProjectTree::new("/p");
        for path in ["/p/z.cpp", "/p/b/x.cpp", "/p/a.cpp", "/elsewhere/q.h"] {
            tree.insert(node(path));
        }
        let paths: Vec<_> = tree.files().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, ["/elsewhere/q.h", "/p/a.cpp", "/p/b/x.cpp", "/p/z.cpp"]);
    }

    #[test]
    fn test_tree_snapshot() {
        let mut tree = ProjectTree::new("/p");
        tree.insert(node("/p/CMakeLists.txt"));
        tree.insert(node("/p/src/main.cpp"));
        insta::assert_json_snapshot!(tree, @r#"
        {
          "root": {
            "name": "p",
            "path": "/p",
            "folders": {
              "src": {
                "name": "src",
                "path": "/p/src",
                "folders": {},
                "files": [
                  {
                    "path": "/p/src/main.cpp",
                    "file_type": "source",
                    "is_generated": false
                  }
                ]
              }
            },
            "files": [
              {
                "path": "/p/CMakeLists.txt",
                "file_type": "project_file",
                "is_generated": false
              }
            ]
          }
        }
        "#);
    }
}
