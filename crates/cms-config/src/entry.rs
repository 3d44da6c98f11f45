//! Typed cache entries.
//!
//! A [`ConfigEntry`] is one `KEY:TYPE=VALUE` setting of the build tool's
//! cache. Entries come from three places: the tool's cache, the kit, and
//! the initial parameters handed to the first configure run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type of a cache entry.
///
/// # Examples
///
/// ```
/// use cms_config::ConfigType;
///
/// assert_eq!(ConfigType::from_type_string("PATH"), ConfigType::DirPath);
/// assert_eq!(ConfigType::from_type_string("bogus"), ConfigType::Uninitialized);
/// assert_eq!(ConfigType::FilePath.as_type_string(), "FILEPATH");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    /// `BOOL`
    Bool,
    /// `FILEPATH`
    FilePath,
    /// `PATH`
    DirPath,
    /// `STRING`
    String,
    /// `INTERNAL`, never shown to the user.
    Internal,
    /// `STATIC`, never passed back to the tool.
    Static,
    /// `UNINITIALIZED`, also used for unknown type strings.
    #[default]
    Uninitialized,
}

impl ConfigType {
    /// Maps a cache type string. Unknown strings map to
    /// [`ConfigType::Uninitialized`].
    #[must_use]
    pub fn from_type_string(value: &str) -> Self {
        match value {
            "BOOL" => Self::Bool,
            "STRING" => Self::String,
            "FILEPATH" => Self::FilePath,
            "PATH" => Self::DirPath,
            "STATIC" => Self::Static,
            "INTERNAL" => Self::Internal,
            _ => Self::Uninitialized,
        }
    }

    /// Returns the cache type string.
    #[inline]
    #[must_use]
    pub const fn as_type_string(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::FilePath => "FILEPATH",
            Self::DirPath => "PATH",
            Self::String => "STRING",
            Self::Internal => "INTERNAL",
            Self::Static => "STATIC",
            Self::Uninitialized => "UNINITIALIZED",
        }
    }

    /// Returns `true` for types the configuration view hides.
    #[inline]
    #[must_use]
    pub const fn is_hidden(self) -> bool {
        matches!(self, Self::Internal | Self::Static)
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_type_string())
    }
}

/// One cache entry.
///
/// Equality looks at the key, value, unset flag and initial flag only; type,
/// documentation and the advanced flag do not take part.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Variable name.
    pub key: String,
    /// Raw value.
    pub value: String,
    /// Declared type.
    pub entry_type: ConfigType,
    /// Marked `-ADVANCED` in the cache.
    pub is_advanced: bool,
    /// Belongs to the initial parameters rather than the live cache.
    pub is_initial: bool,
    /// Scheduled for removal with `-U`.
    pub is_unset: bool,
    /// Present in the tool's last reported cache.
    pub in_tool_cache: bool,
    /// Allowed values, from the matching `-STRINGS` entry.
    pub allowed_values: Vec<String>,
    /// Doc string, from the preceding `//` comment.
    pub documentation: String,
}

impl PartialEq for ConfigEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.is_unset == other.is_unset
            && self.is_initial == other.is_initial
    }
}

impl ConfigEntry {
    /// Creates an entry with a key, type and value.
    #[must_use]
    pub fn new(key: impl Into<String>, entry_type: ConfigType, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            entry_type,
            ..Self::default()
        }
    }

    /// Creates an entry that removes `key` from the cache.
    #[must_use]
    pub fn unset(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_unset: true,
            ..Self::default()
        }
    }

    /// Sets the documentation string.
    #[must_use]
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }

    /// Marks the entry as an initial parameter.
    #[must_use]
    pub const fn initial(mut self) -> Self {
        self.is_initial = true;
        self
    }

    /// Parses a `KEY:TYPE=VALUE` or `KEY=VALUE` definition.
    ///
    /// A leading `#` or `//` comment (after optional whitespace) blanks the
    /// line. Lines without `=` or with an empty key yield `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cms_config::{ConfigEntry, ConfigType};
    ///
    /// let entry = ConfigEntry::from_definition("CMAKE_BUILD_TYPE:STRING=Debug").unwrap();
    /// assert_eq!(entry.key, "CMAKE_BUILD_TYPE");
    /// assert_eq!(entry.entry_type, ConfigType::String);
    /// assert_eq!(entry.value, "Debug");
    ///
    /// assert!(ConfigEntry::from_definition("  # FOO:BOOL=ON").is_none());
    /// ```
    #[must_use]
    pub fn from_definition(input: &str) -> Option<Self> {
        let line = strip_leading_comment(input);

        let mut first = None;
        let mut colon = None;
        let mut equal = None;
        for (i, c) in line.char_indices() {
            if first.is_none() && !c.is_whitespace() {
                first = Some(i);
            }
            if c == ':' {
                if colon.is_some() {
                    break;
                }
                colon = Some(i);
                continue;
            }
            if c == '=' {
                equal = Some(i);
                break;
            }
        }

        let equal = equal?;
        let first = first.unwrap_or(0);
        let key_end = colon.unwrap_or(equal);
        let key = line.get(first..key_end).unwrap_or_default();
        if key.is_empty() {
            return None;
        }
        let type_string = colon
            .and_then(|c| line.get(c + 1..equal))
            .unwrap_or_default();
        let value = &line[equal + 1..];

        Some(Self::new(
            key,
            ConfigType::from_type_string(type_string),
            value,
        ))
    }

    /// Returns the command-line argument for this entry: `-U<key>` when
    /// unset, `-D<key>:<TYPE>=<value>` otherwise.
    ///
    /// Returns `None` for `STATIC` entries and empty keys.
    #[must_use]
    pub fn to_argument(&self) -> Option<String> {
        if self.key.is_empty() {
            return None;
        }
        if self.is_unset {
            return Some(format!("-U{}", self.key));
        }
        self.to_definition().map(|def| format!("-D{def}"))
    }

    /// Returns the `KEY:TYPE=VALUE` form, or `None` for `STATIC` entries and
    /// empty keys.
    #[must_use]
    pub fn to_definition(&self) -> Option<String> {
        if self.key.is_empty() || self.entry_type == ConfigType::Static {
            return None;
        }
        Some(format!("{}:{}={}", self.key, self.entry_type, self.value))
    }

    /// Interprets the value as a boolean constant.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        to_bool(&self.value)
    }
}

fn strip_leading_comment(input: &str) -> &str {
    let trimmed = input.trim_start_matches([' ', '\t']);
    if trimmed.starts_with('#') || trimmed.starts_with("//") {
        ""
    } else {
        input
    }
}

/// Interprets a value as a boolean constant, case-insensitively.
///
/// Follows the tool's `if(<constant>)` rules. Returns `None` for values that
/// are neither true nor false constants.
///
/// # Examples
///
/// ```
/// use cms_config::to_bool;
///
/// assert_eq!(to_bool("on"), Some(true));
/// assert_eq!(to_bool("42"), Some(true));
/// assert_eq!(to_bool("Foo-NOTFOUND"), Some(false));
/// assert_eq!(to_bool(""), Some(false));
/// assert_eq!(to_bool("maybe"), None);
/// ```
#[must_use]
pub fn to_bool(value: &str) -> Option<bool> {
    let v = value.to_ascii_uppercase();
    if matches!(
        v.as_str(),
        "" | "0" | "OFF" | "NO" | "FALSE" | "N" | "IGNORE" | "NOTFOUND"
    ) || v.ends_with("-NOTFOUND")
    {
        return Some(false);
    }
    if matches!(v.as_str(), "1" | "ON" | "YES" | "TRUE" | "Y") || v.parse::<i64>().is_ok() {
        return Some(true);
    }
    None
}

/// Splits a list value at `;`.
///
/// `\;` is an escaped separator and stays in the element. Separators inside
/// `[...]` do not split. Empty elements are dropped unless `keep_empty` is
/// set.
///
/// # Examples
///
/// ```
/// use cms_config::split_value;
///
/// assert_eq!(split_value("a;b\\;c;[d;e]", false), vec!["a", "b;c", "[d;e]"]);
/// assert_eq!(split_value("a;;b", true), vec!["a", "", "b"]);
/// ```
#[must_use]
pub fn split_value(input: &str, keep_empty: bool) -> Vec<String> {
    let mut parts = Vec::new();
    if input.is_empty() {
        return parts;
    }

    let mut nesting = 0_i32;
    let mut current = String::new();
    let mut last = 0;
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some(&(next, ';')) = chars.peek() {
                    current.push_str(&input[last..i]);
                    last = next;
                    chars.next();
                }
            }
            '[' => nesting += 1,
            ']' => nesting -= 1,
            ';' if nesting == 0 => {
                current.push_str(&input[last..i]);
                last = i + 1;
                if !current.is_empty() || keep_empty {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => {}
        }
    }
    current.push_str(&input[last..]);
    if !current.is_empty() || keep_empty {
        parts.push(current);
    }
    parts
}
