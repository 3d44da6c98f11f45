//! Parameters of one build directory.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cms_config::entries_from_arguments;
use cms_core::ToolConfig;
use tracing::warn;

/// File written into the build directory for an inline toolchain override.
pub const TOOLCHAIN_OVERRIDE_FILE_NAME: &str = "cmake-sync-toolchain-override.cmake";

/// How `CMAKE_TOOLCHAIN_FILE` is supplied on an initial configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolchainOverride {
    /// Leave the toolchain to the tool and the user's arguments.
    #[default]
    Disabled,
    /// Pass an existing toolchain file.
    File(Utf8PathBuf),
    /// Write this content to [`TOOLCHAIN_OVERRIDE_FILE_NAME`] in the build
    /// directory and pass that file.
    Inline(String),
}

/// Everything the reader needs to know about one build directory.
///
/// # Examples
///
/// ```
/// use cms_reader::BuildDirParameters;
///
/// let params = BuildDirParameters::new("/src", "/src/build")
///     .with_project_name("demo")
///     .with_build_type("Debug")
///     .with_initial_arguments(["-DCMAKE_BUILD_TYPE:STRING=Debug"]);
///
/// assert_eq!(params.project_name, "demo");
/// assert_eq!(params.cache_file(), "/src/build/CMakeCache.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildDirParameters {
    /// Display name used when the reply has none.
    pub project_name: String,
    /// Top-level source directory.
    pub source_dir: Utf8PathBuf,
    /// Build directory the tool runs in.
    pub build_dir: Utf8PathBuf,
    /// Configuration to read from multi-config replies, also passed as
    /// `CMAKE_BUILD_TYPE` on initial configurations.
    pub build_type: Option<String>,
    /// The tool and its capabilities.
    pub tool: ToolConfig,
    /// Arguments for an initial configuration.
    pub initial_arguments: Vec<String>,
    /// The pending configuration delta.
    pub extra_arguments: Vec<String>,
    /// Upper bound for one tool run.
    pub timeout: Option<Duration>,
    /// Toolchain supplied on initial configurations.
    pub toolchain: ToolchainOverride,
}

impl BuildDirParameters {
    /// Creates parameters with the default tool.
    #[must_use]
    pub fn new(source_dir: impl Into<Utf8PathBuf>, build_dir: impl Into<Utf8PathBuf>) -> Self {
        let source_dir = source_dir.into();
        Self {
            project_name: source_dir.file_name().unwrap_or_default().to_owned(),
            source_dir,
            build_dir: build_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Sets the configuration to read from multi-config replies.
    #[must_use]
    pub fn with_build_type(mut self, build_type: impl Into<String>) -> Self {
        self.build_type = Some(build_type.into());
        self
    }

    /// Sets the tool.
    #[must_use]
    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tool = tool;
        self
    }

    /// Sets the initial configuration arguments.
    #[must_use]
    pub fn with_initial_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the configuration delta.
    #[must_use]
    pub fn with_extra_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the toolchain override.
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: ToolchainOverride) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Sets the tool timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the cache file of the build directory.
    #[must_use]
    pub fn cache_file(&self) -> Utf8PathBuf {
        self.build_dir.join(cms_config::CACHE_FILE_NAME)
    }

    /// Returns the top-level build-description file.
    #[must_use]
    pub fn top_level_lists_file(&self) -> Utf8PathBuf {
        self.source_dir.join("CMakeLists.txt")
    }

    /// Returns `true` if the build directory is the source directory.
    #[must_use]
    pub fn is_in_source_build(&self) -> bool {
        self.build_dir == self.source_dir
    }

    /// Returns `true` if a running server session for `self` can serve
    /// `other` as well.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.tool.program == other.tool.program
            && self.tool.server_mode == other.tool.server_mode
            && self.tool.generator == other.tool.generator
            && self.tool.environment == other.tool.environment
            && self.source_dir == other.source_dir
            && self.build_dir == other.build_dir
    }

    /// Assembles the arguments of a configure run.
    ///
    /// An initial configuration is prefixed with `CMAKE_BUILD_TYPE` (from
    /// [`Self::build_type`]) and `CMAKE_TOOLCHAIN_FILE` (from
    /// [`Self::toolchain`]) unless the initial arguments already define
    /// them. An inline toolchain is written to the build directory here; if
    /// that fails the definition is left out.
    #[must_use]
    pub fn tool_arguments(&self, initial: bool, extra: bool) -> Vec<String> {
        let mut args = Vec::new();
        if initial {
            args.extend(self.composed_definitions());
            args.extend(self.initial_arguments.iter().cloned());
        }
        if extra {
            args.extend(self.extra_arguments.iter().cloned());
        }
        args
    }

    fn composed_definitions(&self) -> Vec<String> {
        let defined = entries_from_arguments(&self.initial_arguments).entries;
        let is_defined = |key: &str| {
            defined
                .iter()
                .any(|e| !e.is_unset && e.key.eq_ignore_ascii_case(key))
        };

        let mut out = Vec::new();
        if let Some(build_type) = self.build_type.as_deref().filter(|t| !t.is_empty()) {
            if !is_defined("CMAKE_BUILD_TYPE") {
                out.push(format!("-DCMAKE_BUILD_TYPE={build_type}"));
            }
        }
        if !is_defined("CMAKE_TOOLCHAIN_FILE") {
            if let Some(file) = self.toolchain_file() {
                out.push(format!("-DCMAKE_TOOLCHAIN_FILE={file}"));
            }
        }
        out
    }

    /// Returns the toolchain file to pass, writing an inline override first.
    fn toolchain_file(&self) -> Option<Utf8PathBuf> {
        match &self.toolchain {
            ToolchainOverride::Disabled => None,
            ToolchainOverride::File(file) if file.as_str().is_empty() => None,
            ToolchainOverride::File(file) => Some(file.clone()),
            ToolchainOverride::Inline(content) => {
                let path = self.build_dir.join(TOOLCHAIN_OVERRIDE_FILE_NAME);
                let written = std::fs::create_dir_all(&self.build_dir)
                    .and_then(|()| std::fs::write(&path, content));
                match written {
                    Ok(()) => Some(path),
                    Err(e) => {
                        warn!(path = %path, error = %e, "Failed to write toolchain override");
                        None
                    }
                }
            }
        }
    }

    /// Returns `path` relative to the source directory, for display.
    #[must_use]
    pub fn display_path<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.source_dir).unwrap_or(path)
    }
}
