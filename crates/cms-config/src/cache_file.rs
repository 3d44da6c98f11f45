//! Reading entries from `CMakeCache.txt` and from command-line arguments.

use camino::Utf8Path;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::entry::{ConfigEntry, ConfigType, split_value};
use crate::error::EntryError;

/// File name of the tool's cache in the build directory.
pub const CACHE_FILE_NAME: &str = "CMakeCache.txt";

const ADVANCED_SUFFIX: &str = "-ADVANCED";
const STRINGS_SUFFIX: &str = "-STRINGS";

/// Entries parsed from `-D`/`-U` arguments, plus everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArguments {
    /// Entries with non-empty keys, in argument order.
    pub entries: Vec<ConfigEntry>,
    /// Arguments that are not cache definitions.
    pub unknown: Vec<String>,
}

/// Parses `-D`/`-U` arguments, attached (`-DFOO=1`) or separate (`-D FOO=1`).
///
/// # Examples
///
/// ```
/// use cms_config::entries_from_arguments;
///
/// let parsed = entries_from_arguments(["-DA:BOOL=ON", "-U", "B", "-G", "Ninja"]);
/// assert_eq!(parsed.entries.len(), 2);
/// assert!(parsed.entries[1].is_unset);
/// assert_eq!(parsed.unknown, vec!["-G", "Ninja"]);
/// ```
pub fn entries_from_arguments<I, S>(args: I) -> ParsedArguments
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Pending {
        None,
        Set,
        Unset,
    }

    let mut parsed = ParsedArguments::default();
    let mut pending = Pending::None;
    for arg in args {
        let arg = arg.as_ref();
        match std::mem::replace(&mut pending, Pending::None) {
            Pending::Set => {
                parsed.entries.extend(ConfigEntry::from_definition(arg));
                continue;
            }
            Pending::Unset => {
                parsed.entries.push(ConfigEntry::unset(arg));
                continue;
            }
            Pending::None => {}
        }
        match arg {
            "-D" => pending = Pending::Set,
            "-U" => pending = Pending::Unset,
            _ => {
                if let Some(rest) = arg.strip_prefix("-U") {
                    parsed.entries.push(ConfigEntry::unset(rest));
                } else if let Some(rest) = arg.strip_prefix("-D") {
                    parsed.entries.extend(ConfigEntry::from_definition(rest));
                } else {
                    parsed.unknown.push(arg.to_owned());
                }
            }
        }
    }
    parsed.entries.retain(|e| !e.key.is_empty());
    parsed
}

/// Reads and parses a cache file.
pub fn entries_from_cache_file(path: &Utf8Path) -> Result<Vec<ConfigEntry>, EntryError> {
    let text = std::fs::read_to_string(path).map_err(|e| EntryError::io(path, e))?;
    let entries = parse_cache(&text);
    tracing::debug!(path = %path, entries = entries.len(), "Read cache file");
    Ok(entries)
}

/// Parses cache file text into entries sorted by key.
///
/// `//` lines document the next entry, `#` lines are comments. `KEY-ADVANCED`
/// and `KEY-STRINGS` entries decorate `KEY` instead of becoming entries of
/// their own. Lines that do not split into key, type and value are skipped.
#[must_use]
pub fn parse_cache(text: &str) -> Vec<ConfigEntry> {
    let mut entries = Vec::new();
    let mut advanced: FxHashSet<&str> = FxHashSet::default();
    let mut strings: FxHashMap<&str, &str> = FxHashMap::default();
    let mut documentation = "";

    for raw in text.lines() {
        let line = raw.trim_start_matches([' ', '\t']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(doc) = line.strip_prefix("//") {
            documentation = doc;
            continue;
        }
        let Some((key, type_string, value)) = split_cache_line(line) else {
            tracing::debug!(line, "Skipping unparsable cache line");
            continue;
        };
        let entry_type = ConfigType::from_type_string(type_string);

        if let Some(base) = key.strip_suffix(ADVANCED_SUFFIX).filter(|_| value == "1") {
            advanced.insert(base);
        } else if let Some(base) = key
            .strip_suffix(STRINGS_SUFFIX)
            .filter(|_| entry_type == ConfigType::Internal)
        {
            strings.insert(base, value);
        } else {
            entries.push(ConfigEntry::new(key, entry_type, value).with_documentation(documentation));
        }
    }

    for entry in &mut entries {
        entry.is_advanced = advanced.contains(entry.key.as_str());
        if let Some(values) = strings.get(entry.key.as_str()) {
            entry.allowed_values = split_value(values, false);
        } else if entry.key == "CMAKE_BUILD_TYPE" {
            entry.allowed_values = ["", "Debug", "Release", "MinSizeRel", "RelWithDebInfo"]
                .map(str::to_owned)
                .to_vec();
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

fn split_cache_line(line: &str) -> Option<(&str, &str, &str)> {
    let (key, rest) = line.split_once(':')?;
    let (type_string, value) = rest.split_once('=')?;
    Some((key, type_string, value))
}

/// Returns the value of `key`, or `None` if absent.
#[must_use]
pub fn value_of<'a>(entries: &'a [ConfigEntry], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.key == key)
        .map(|e| e.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CACHE: &str = "\
# This is the CMakeCache file.
########################
// Build type
CMAKE_BUILD_TYPE:STRING=Debug

//Enable tests
BUILD_TESTING:BOOL=ON
BUILD_TESTING-ADVANCED:INTERNAL=1
//Backend
BACKEND:STRING=gl
BACKEND-STRINGS:INTERNAL=gl;vulkan;metal
CMAKE_HOME_DIRECTORY:INTERNAL=/src
broken line without separators
";

    #[test]
    fn test_parse_cache() {
        let entries = parse_cache(CACHE);
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            ["BACKEND", "BUILD_TESTING", "CMAKE_BUILD_TYPE", "CMAKE_HOME_DIRECTORY"]
        );

        let backend = &entries[0];
        assert_eq!(backend.allowed_values, ["gl", "vulkan", "metal"]);
        assert_eq!(backend.documentation, "Backend");
        assert!(!backend.is_advanced);

        let testing = &entries[1];
        assert!(testing.is_advanced);
        assert_eq!(testing.entry_type, ConfigType::Bool);
        assert_eq!(testing.documentation, "Enable tests");

        let build_type = &entries[2];
        assert_eq!(build_type.documentation, " Build type");
        assert_eq!(build_type.allowed_values.len(), 5);
        assert_eq!(entries[3].entry_type, ConfigType::Internal);
    }

    #[test]
    fn test_value_of() {
        let entries = parse_cache(CACHE);
        assert_eq!(value_of(&entries, "BACKEND"), Some("gl"));
        assert_eq!(value_of(&entries, "MISSING"), None);
    }

    #[test]
    fn test_missing_cache_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join(CACHE_FILE_NAME);
        let err = entries_from_cache_file(&path).unwrap_err();
        assert_eq!(err.path(), Some(&path));
    }

    #[test]
    fn test_cache_file_roundtrip_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join(CACHE_FILE_NAME);
        std::fs::write(&path, CACHE).unwrap();
        assert_eq!(entries_from_cache_file(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_arguments_separate_and_attached() {
        let parsed = entries_from_arguments([
            "-D",
            "CMAKE_BUILD_TYPE:STRING=Release",
            "-DFOO=1",
            "-UBAR",
            "-D",
            "",
            "--fresh",
        ]);
        let keys: Vec<_> = parsed.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["CMAKE_BUILD_TYPE", "FOO", "BAR"]);
        assert!(parsed.entries[2].is_unset);
        assert_eq!(parsed.unknown, ["--fresh"]);
    }
}
