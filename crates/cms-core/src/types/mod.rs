//! Domain types shared by every engine component.
//!
//! # Module Organization
//!
//! - [`file`] - Project file nodes and their classification
//! - [`target`] - Build targets, project parts, backtraces
//! - [`reparse`] - Coalescing reparse force-flags
//! - [`state`] - The reader lifecycle state
//! - [`deployment`] - Deployment manifest data
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use cms_core::{BuildTarget, FileNode, FileType, ReaderState, ReparseFlags};
//! ```

pub mod deployment;
pub mod file;
pub mod reparse;
pub mod state;
pub mod target;

pub use deployment::{DEPLOYMENT_MANIFEST, DeployableFile, DeployableKind, DeploymentData};
pub use file::{FileNode, FileType};
pub use reparse::ReparseFlags;
pub use state::ReaderState;
pub use target::{BacktraceFrame, BuildTarget, IncludePath, ProjectPart, TargetType};
