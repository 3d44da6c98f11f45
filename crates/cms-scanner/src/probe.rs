//! Binary content detection with a per-scanner cache.
//!
//! A file is binary if its leading bytes contain a NUL. Results are cached by
//! [`ContentSignature`], the lowercased extension, so only the first file of
//! each kind is read. Files without an extension have no signature and are
//! always read.

use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::ScanError;

/// The content class of a file, derived from its name alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentSignature {
    /// Lowercased extension, never empty.
    pub extension: String,
}

impl ContentSignature {
    /// Returns the signature of `path`, or `None` if it has no extension.
    #[must_use]
    pub fn of(path: &Utf8Path) -> Option<Self> {
        path.extension()
            .filter(|ext| !ext.is_empty())
            .map(|ext| Self {
                extension: ext.to_ascii_lowercase(),
            })
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Whether the content is binary.
    pub is_binary: bool,
    /// Whether the answer came from the cache.
    pub cached: bool,
}

/// Cache of binary probe results, owned by one scanner.
///
/// # Examples
///
/// ```
/// use cms_scanner::BinaryProbeCache;
/// use camino::Utf8Path;
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let root = Utf8Path::from_path(dir.path()).unwrap();
/// std::fs::write(root.join("blob.dat"), b"\x7fELF\0\0\0").unwrap();
/// std::fs::write(root.join("other.DAT"), b"\x7fELF\0\0\0").unwrap();
///
/// let cache = BinaryProbeCache::new();
/// assert!(cache.probe(&root.join("blob.dat"), 512).unwrap().is_binary);
/// assert!(cache.probe(&root.join("other.DAT"), 512).unwrap().cached);
/// ```
#[derive(Debug, Default)]
pub struct BinaryProbeCache {
    results: RwLock<FxHashMap<ContentSignature, bool>>,
}

impl BinaryProbeCache {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether `path` is binary.
    ///
    /// The cache is consulted before the file is opened; on a miss up to
    /// `sniff_bytes` are read and the answer is stored for the file's
    /// signature.
    pub fn probe(&self, path: &Utf8Path, sniff_bytes: usize) -> Result<Probe, ScanError> {
        let signature = ContentSignature::of(path);
        if let Some(signature) = &signature {
            if let Some(&is_binary) = self.results.read().get(signature) {
                return Ok(Probe {
                    is_binary,
                    cached: true,
                });
            }
        }

        let file = File::open(path).map_err(|e| ScanError::read(path, e))?;
        let mut head = Vec::with_capacity(sniff_bytes);
        file.take(sniff_bytes as u64)
            .read_to_end(&mut head)
            .map_err(|e| ScanError::read(path, e))?;

        let is_binary = looks_binary(&head);
        if let Some(signature) = signature {
            self.results.write().insert(signature, is_binary);
        }
        Ok(Probe {
            is_binary,
            cached: false,
        })
    }

    /// Returns the number of cached signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }

    /// Drops every cached result.
    pub fn clear(&self) {
        self.results.write().clear();
    }
}

/// Returns `true` if `head` contains a NUL byte.
#[inline]
#[must_use]
pub fn looks_binary(head: &[u8]) -> bool {
    head.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn write(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> Utf8PathBuf {
        let path = Utf8Path::from_path(dir.path()).unwrap().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_text_is_not_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(&dir, "notes.txt", b"plain text\n");
        let probe = BinaryProbeCache::new().probe(&path, 512).unwrap();
        assert!(!probe.is_binary);
        assert!(!probe.cached);
    }

    #[test]
    fn test_same_extension_shares_entry() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = write(&dir, "a.bin", b"\0\x01\x02");
        let b = write(&dir, "b.BIN", b"\0\x01\x02");
        let cache = BinaryProbeCache::new();
        assert!(!cache.probe(&a, 512).unwrap().cached);
        assert!(cache.probe(&b, 512).unwrap().cached);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_hit_does_not_open_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let seen = write(&dir, "first.dat", b"\0\0");
        let cache = BinaryProbeCache::new();
        assert!(cache.probe(&seen, 512).unwrap().is_binary);

        // Never written: a read would fail.
        let absent = Utf8Path::from_path(dir.path()).unwrap().join("second.dat");
        let probe = cache.probe(&absent, 512).unwrap();
        assert!(probe.cached);
        assert!(probe.is_binary);
    }

    #[test]
    fn test_files_without_extension_are_not_cached() {
        let dir = tempfile::TempDir::new().unwrap();
        let text = write(&dir, "README", b"text\n");
        let blob = write(&dir, "blob", b"\0\x01");
        let cache = BinaryProbeCache::new();
        assert!(!cache.probe(&text, 512).unwrap().is_binary);
        let probe = cache.probe(&blob, 512).unwrap();
        assert!(probe.is_binary);
        assert!(!probe.cached);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_nul_beyond_sniff_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut content = vec![b'a'; 16];
        content.push(0);
        let path = write(&dir, "late.dat", &content);
        assert!(!BinaryProbeCache::new().probe(&path, 8).unwrap().is_binary);
        assert!(BinaryProbeCache::new().probe(&path, 64).unwrap().is_binary);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = BinaryProbeCache::new()
            .probe(Utf8Path::new("/definitely/not/here"), 16)
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
