//! Configuration structures for the synchronization engine.
//!
//! This module provides configuration types for every engine component:
//!
//! - [`ScanConfig`] - Filesystem scanner settings (skip dirs, symlink cap, sniffing)
//! - [`WatchConfig`] - Directory watcher settings (debouncing)
//! - [`ReparseConfig`] - Orchestrator timing (throttle window, delays, timeouts)
//! - [`ToolConfig`] - External build-description tool settings
//! - [`EngineConfig`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] and deserialize with
//! `#[serde(default)]`, so a config file only needs the keys it overrides.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hash::FxHashMap;

/// Configuration for the filesystem tree scanner.
///
/// # Examples
///
/// ```
/// use cms_core::ScanConfig;
///
/// let config = ScanConfig::default();
/// assert_eq!(config.max_symlink_hops, 5);
/// assert!(config.sniff_binary);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names to skip in addition to the built-in exclusions.
    pub skip_dirs: Vec<String>,

    /// Maximum number of symlinked directories followed along one path.
    pub max_symlink_hops: u32,

    /// Whether to sniff file contents to drop binary files.
    pub sniff_binary: bool,

    /// Number of leading bytes read when sniffing.
    pub sniff_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            skip_dirs: Vec::new(),
            max_symlink_hops: 5,
            sniff_binary: true,
            sniff_bytes: 512,
        }
    }
}

/// Configuration for the directory watcher.
///
/// # Examples
///
/// ```
/// use cms_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_ms, 100);
/// assert!(!config.recursive);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Whether directory watching is enabled at all.
    pub enabled: bool,

    /// Debounce window in milliseconds.
    pub debounce_ms: u64,

    /// Whether each watch covers subdirectories.
    ///
    /// The engine installs one watch per scanned directory, so this stays
    /// `false` unless the host watches only the project root.
    pub recursive: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
            recursive: false,
        }
    }
}

impl WatchConfig {
    /// Returns the debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Timing configuration for the reparse orchestrator.
///
/// # Examples
///
/// ```
/// use cms_core::ReparseConfig;
/// use std::time::Duration;
///
/// let config = ReparseConfig::default();
/// assert_eq!(config.throttle_window(), Duration::from_millis(4500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReparseConfig {
    /// Minimum interval between two watch-triggered rescans, in milliseconds.
    pub throttle_ms: u64,

    /// Delay before a non-urgent reparse request is dispatched, in milliseconds.
    pub reparse_delay_ms: u64,

    /// Upper bound on a single tool run, in seconds. `0` disables the bound.
    pub tool_timeout_secs: u64,

    /// Grace period for outstanding subprocesses on teardown, in milliseconds.
    pub teardown_grace_ms: u64,
}

impl Default for ReparseConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 4500,
            reparse_delay_ms: 1000,
            tool_timeout_secs: 600,
            teardown_grace_ms: 2000,
        }
    }
}

impl ReparseConfig {
    /// Returns the rescan throttle window.
    #[inline]
    #[must_use]
    pub const fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Returns the delay applied to non-urgent reparse requests.
    #[inline]
    #[must_use]
    pub const fn reparse_delay(&self) -> Duration {
        Duration::from_millis(self.reparse_delay_ms)
    }

    /// Returns the tool timeout, or `None` when unbounded.
    #[inline]
    #[must_use]
    pub const fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tool_timeout_secs))
        }
    }

    /// Returns the teardown grace period.
    #[inline]
    #[must_use]
    pub const fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

/// Settings for the external build-description tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path or name of the tool executable.
    pub program: Utf8PathBuf,

    /// Whether the tool may be re-run automatically when inputs change.
    pub auto_run: bool,

    /// Whether the tool only speaks the legacy server protocol.
    pub server_mode: bool,

    /// Generator passed as `-G` on initial configuration.
    pub generator: Option<String>,

    /// Extra environment variables set on every tool run.
    pub environment: FxHashMap<String, String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: Utf8PathBuf::from("cmake"),
            auto_run: true,
            server_mode: false,
            generator: None,
            environment: FxHashMap::default(),
        }
    }
}

impl ToolConfig {
    /// Returns the generator arguments (`-G <name>`), empty when unset.
    #[must_use]
    pub fn generator_arguments(&self) -> Vec<String> {
        self.generator
            .as_ref()
            .map(|g| vec!["-G".to_owned(), g.clone()])
            .unwrap_or_default()
    }
}

/// Root configuration for the engine.
///
/// # Examples
///
/// ```
/// use cms_core::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{"reparse": {"throttle_ms": 100}}"#).unwrap();
/// assert_eq!(config.reparse.throttle_ms, 100);
/// assert_eq!(config.watch.debounce_ms, 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scanner configuration.
    pub scan: ScanConfig,

    /// Directory watcher configuration.
    pub watch: WatchConfig,

    /// Orchestrator timing configuration.
    pub reparse: ReparseConfig,

    /// External tool configuration.
    pub tool: ToolConfig,
}

impl EngineConfig {
    /// Parses a configuration from a JSON string and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid JSON.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path, "Loaded engine configuration");
        Self::from_json_str(&text)
    }

    /// Checks option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.sniff_binary && self.scan.sniff_bytes == 0 {
            return Err(ConfigError::invalid_option(
                "scan.sniff_bytes",
                "must be positive when sniffing is enabled",
            ));
        }
        if self.tool.program.as_str().is_empty() {
            return Err(ConfigError::invalid_option("tool.program", "must not be empty"));
        }
        Ok(())
    }
}
