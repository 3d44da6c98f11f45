//! Core types, engine configuration, and utilities for cmake-sync.
//!
//! This crate provides the foundational types shared across the workspace:
//!
//! - Error types for configuration loading ([`ConfigError`])
//! - Engine configuration ([`EngineConfig`] and its sections)
//! - Domain types: [`FileNode`], [`BuildTarget`], [`ReparseFlags`],
//!   [`ReaderState`], [`DeploymentData`]
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)
//!
//! # Crate Dependencies
//!
//! ```text
//! cms-cli ──► cms-engine ──► cms-reader ──► cms-config ──► cms-core
//!                       ├──► cms-scanner ─────────────────►
//!                       └──► cms-watcher ─────────────────►
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::{EngineConfig, ReparseConfig, ScanConfig, ToolConfig, WatchConfig};
pub use error::ConfigError;
pub use hash::{FxBuildHasher, FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
pub use types::{
    BacktraceFrame, BuildTarget, DeployableFile, DeployableKind, DeploymentData, FileNode,
    FileType, IncludePath, ProjectPart, ReaderState, ReparseFlags, TargetType,
    DEPLOYMENT_MANIFEST,
};
