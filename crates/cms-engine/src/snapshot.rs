//! Immutable project models handed to the host.

use camino::{Utf8Path, Utf8PathBuf};
use cms_config::ModelEntry;
use cms_core::{BuildTarget, DeploymentData, FileType, ProjectPart};
use cms_reader::{CMakeInputs, Diagnostic};
use serde::Serialize;

use crate::reconcile::generated_files_for;
use crate::tree::ProjectTree;

/// One published project model.
///
/// Snapshots are shared behind an `Arc` and never change after
/// publication. Edits go back through the engine handle.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSnapshot {
    /// Publication sequence number, starting at 1.
    pub sequence: u64,
    /// Id of the build configuration the model belongs to.
    pub configuration: String,
    /// Display name of the project.
    pub project_name: String,
    /// Top-level source directory.
    pub source_dir: Utf8PathBuf,
    /// Build directory.
    pub build_dir: Utf8PathBuf,
    /// The reconciled file tree.
    pub tree: ProjectTree,
    /// Build targets.
    pub targets: Vec<BuildTarget>,
    /// Code-model parts.
    pub project_parts: Vec<ProjectPart>,
    /// Configure inputs.
    pub cmake_inputs: CMakeInputs,
    /// The configuration model, initial entries first.
    pub configuration_entries: Vec<ModelEntry>,
    /// Deployment data, if a manifest exists.
    pub deployment: Option<DeploymentData>,
    /// Diagnostics of the cycle that produced the model.
    pub diagnostics: Vec<Diagnostic>,
    /// Whether the model is the minimal fallback.
    pub is_fallback: bool,
    /// Paths new since the previous snapshot.
    pub added: Vec<Utf8PathBuf>,
    /// Paths gone since the previous snapshot.
    pub removed: Vec<Utf8PathBuf>,
}

impl ProjectSnapshot {
    /// Returns the number of files in the tree.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.tree.len()
    }

    /// Returns the target titled `name`.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&BuildTarget> {
        self.targets.iter().find(|t| t.title == name)
    }

    /// Returns the files the build generates from `source`.
    #[must_use]
    pub fn generated_files_for(&self, source: &Utf8Path) -> Vec<Utf8PathBuf> {
        generated_files_for(source, &self.source_dir, &self.build_dir)
    }

    /// Returns every form and state chart in the tree with the files
    /// generated from it.
    #[must_use]
    pub fn generated_companions(&self) -> Vec<(Utf8PathBuf, Vec<Utf8PathBuf>)> {
        self.tree
            .files()
            .into_iter()
            .filter(|f| f.file_type == FileType::UiForm || f.path.extension() == Some("scxml"))
            .map(|f| {
                let generated = self.generated_files_for(&f.path);
                (f.path, generated)
            })
            .collect()
    }
}
