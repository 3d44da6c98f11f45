//! Build targets and per-target compile information.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Kind of artifact a target produces.
///
/// # Examples
///
/// ```
/// use cms_core::TargetType;
///
/// assert_eq!(TargetType::from_tool_type("SHARED_LIBRARY"), TargetType::DynamicLib);
/// assert_eq!(TargetType::from_tool_type("INTERFACE_LIBRARY"), TargetType::Utility);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Runnable program.
    Executable,
    /// Static archive.
    StaticLib,
    /// Shared or module library.
    DynamicLib,
    /// Object library (no linked artifact).
    ObjectLib,
    /// Custom, interface or otherwise artifact-less target.
    #[default]
    Utility,
}

impl TargetType {
    /// Maps the tool's target type string.
    ///
    /// Unknown strings become [`TargetType::Utility`].
    #[must_use]
    pub fn from_tool_type(value: &str) -> Self {
        match value {
            "EXECUTABLE" => Self::Executable,
            "STATIC_LIBRARY" => Self::StaticLib,
            "OBJECT_LIBRARY" => Self::ObjectLib,
            "SHARED_LIBRARY" | "MODULE_LIBRARY" => Self::DynamicLib,
            _ => Self::Utility,
        }
    }

    /// Returns `true` for targets whose artifact is deployed at runtime.
    #[inline]
    #[must_use]
    pub const fn is_deployable(self) -> bool {
        matches!(self, Self::Executable | Self::DynamicLib)
    }

    /// Returns a short lowercase label.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::StaticLib => "static library",
            Self::DynamicLib => "shared library",
            Self::ObjectLib => "object library",
            Self::Utility => "utility",
        }
    }
}

/// One frame of the command backtrace that defined a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacktraceFrame {
    /// Build-description file containing the command.
    pub path: Utf8PathBuf,
    /// 1-based line number, `0` when unknown.
    pub line: u32,
    /// Command or function name at that frame.
    pub function: String,
}

/// An include directory of a project part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludePath {
    /// The directory.
    pub path: Utf8PathBuf,
    /// Whether it is passed as a system include.
    pub is_system: bool,
}

/// A file group: sources of one target compiled with identical settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPart {
    /// Display name, `<target>` or `<target>_cg<index>`.
    pub name: String,
    /// Owning target title.
    pub target: String,
    /// Compile language (`C`, `CXX`, `CUDA`).
    pub language: String,
    /// Compiler flags, already split into arguments.
    pub flags: Vec<String>,
    /// Include directories in command-line order.
    pub include_paths: Vec<IncludePath>,
    /// Preprocessor definitions as `NAME` or `NAME=VALUE`.
    pub defines: Vec<String>,
    /// Source files of the group.
    pub sources: Vec<Utf8PathBuf>,
    /// Precompiled-header files the group uses.
    pub precompiled_headers: Vec<Utf8PathBuf>,
    /// Whether the group belongs to an executable target.
    pub builds_executable: bool,
}

/// A build target as reported by the external tool.
///
/// Targets are replaced as a whole on every successful parse cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Target name.
    pub title: String,
    /// Main artifact on disk, if the target produces one.
    pub artifact_path: Option<Utf8PathBuf>,
    /// Kind of target.
    pub target_type: TargetType,
    /// Directory the artifact runs in.
    pub working_dir: Utf8PathBuf,
    /// Source directory that defined the target.
    pub source_dir: Utf8PathBuf,
    /// Build directory of the target.
    pub build_dir: Utf8PathBuf,
    /// Union of include paths over the target's file groups.
    pub include_paths: Vec<Utf8PathBuf>,
    /// Union of compile flags over the target's file groups.
    pub compile_flags: Vec<String>,
    /// Union of defines over the target's file groups.
    pub defines: Vec<String>,
    /// All sources of the target.
    pub sources: Vec<Utf8PathBuf>,
    /// Definition backtrace, innermost frame first.
    pub backtrace: Vec<BacktraceFrame>,
    /// Directories of libraries the target links against.
    pub library_directories: Vec<Utf8PathBuf>,
    /// Names of targets this target depends on.
    pub dependencies: Vec<String>,
}

impl BuildTarget {
    /// Creates an empty target with a title and type.
    #[must_use]
    pub fn new(title: impl Into<String>, target_type: TargetType) -> Self {
        Self {
            title: title.into(),
            target_type,
            ..Self::default()
        }
    }

    /// Returns `true` if the target is one of the tool's helper targets
    /// (`all`, `clean`, `install`, ...) rather than a user target.
    #[must_use]
    pub fn is_special(&self) -> bool {
        matches!(
            self.title.as_str(),
            "all" | "clean" | "install" | "install/strip" | "test" | "ALL_BUILD" | "ZERO_CHECK"
        )
    }
}
