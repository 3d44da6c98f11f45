//! Server-mode reply objects and their extraction into [`ProjectData`].

use camino::{Utf8Path, Utf8PathBuf};
use cms_config::{ConfigEntry, ConfigType, split_value};
use cms_core::types::file::sort_and_dedup;
use cms_core::{
    BacktraceFrame, BuildTarget, FileNode, FileType, FxHashMap, FxHashSet, IncludePath,
    ProjectPart, TargetType,
};
use serde::Deserialize;

use crate::args::split_args;
use crate::extract::{ProjectData, extract_cmake_inputs, resolve};
use crate::fileapi::{CMakeFilesReply, CMakeInput, SourceBuildPaths};
use crate::server::ServerReplies;

/// The `codemodel` reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerCodemodel {
    /// One entry per build configuration.
    pub configurations: Vec<ServerConfiguration>,
}

/// One build configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfiguration {
    /// Configuration name, empty for single-config generators.
    pub name: String,
    /// Projects, top-level first.
    pub projects: Vec<ServerProject>,
}

/// A `project()` of the build description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerProject {
    /// Project name.
    pub name: String,
    /// Directory of the `project()` call.
    pub source_directory: Utf8PathBuf,
    /// Targets of the project. A target shows up in every project that
    /// contains it.
    pub targets: Vec<ServerTarget>,
}

/// A target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerTarget {
    /// Target name.
    pub name: String,
    /// Type string (`EXECUTABLE`, `STATIC_LIBRARY`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Source directory of the target.
    pub source_directory: Utf8PathBuf,
    /// Build directory of the target.
    pub build_directory: Utf8PathBuf,
    /// Artifacts on disk.
    pub artifacts: Vec<Utf8PathBuf>,
    /// Groups of sources sharing compile settings.
    pub file_groups: Vec<ServerFileGroup>,
    /// Where the target was defined.
    pub cross_references: ServerCrossReferences,
}

/// Definition site of a target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerCrossReferences {
    /// Call stack, innermost first.
    pub backtrace: Vec<ServerBacktraceItem>,
}

/// One backtrace frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerBacktraceItem {
    /// Defining file.
    pub path: Utf8PathBuf,
    /// Line, `-1` when unknown.
    pub line: i64,
    /// Command or function name.
    pub name: String,
}

/// A file group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerFileGroup {
    /// Compile language, may be empty.
    pub language: String,
    /// Compiler flags as one command-line string.
    pub compile_flags: String,
    /// Include directories.
    pub include_path: Vec<ServerIncludePath>,
    /// Defines as `NAME` or `NAME=VALUE`.
    pub defines: Vec<String>,
    /// Sources, relative to the target's source directory.
    pub sources: Vec<Utf8PathBuf>,
    /// The group only holds generated files.
    pub is_generated: bool,
}

impl ServerFileGroup {
    fn has_settings(&self) -> bool {
        !self.include_path.is_empty() || !self.compile_flags.is_empty() || !self.defines.is_empty()
    }
}

/// An include directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerIncludePath {
    /// Directory.
    pub path: Utf8PathBuf,
    /// Whether it is a system include.
    pub is_system: bool,
}

/// The `cmakeInputs` reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInputs {
    /// Top-level source directory.
    pub source_directory: Utf8PathBuf,
    /// Input files, in sections sharing flags.
    pub build_files: Vec<ServerBuildFiles>,
}

/// A section of input files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBuildFiles {
    /// Part of the tool's own installation.
    #[serde(rename = "isCMake")]
    pub is_cmake: bool,
    /// Written by the configure step.
    pub is_temporary: bool,
    /// Paths, relative to the source directory or absolute.
    pub sources: Vec<Utf8PathBuf>,
}

/// The `cache` reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerCache {
    /// Cache entries.
    pub cache: Vec<ServerCacheEntry>,
}

/// One cache entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerCacheEntry {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
    /// Type string.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Properties (`ADVANCED`, `HELPSTRING`, `STRINGS`).
    pub properties: FxHashMap<String, String>,
}

impl ServerCache {
    /// Converts the reply into configuration entries.
    #[must_use]
    pub fn entries(&self) -> Vec<ConfigEntry> {
        self.cache
            .iter()
            .map(|e| {
                let mut entry = ConfigEntry::new(
                    e.key.clone(),
                    ConfigType::from_type_string(&e.entry_type),
                    e.value.clone(),
                );
                entry.in_tool_cache = true;
                entry.is_advanced = e
                    .properties
                    .get("ADVANCED")
                    .is_some_and(|v| cms_config::to_bool(v).unwrap_or(false));
                entry.documentation = e.properties.get("HELPSTRING").cloned().unwrap_or_default();
                entry.allowed_values = e
                    .properties
                    .get("STRINGS")
                    .map(|v| split_value(v, true))
                    .unwrap_or_default();
                entry
            })
            .collect()
    }
}

/// Gives groups without a language the language of the target's main
/// group, and copies that group's settings into groups that have none.
fn fix_language_fallbacks(groups: &mut [ServerFileGroup]) {
    let mut best: FxHashMap<String, usize> = FxHashMap::default();
    for (index, group) in groups.iter().enumerate() {
        if !group.has_settings() {
            continue;
        }
        let replace = best
            .get(&group.language)
            .is_none_or(|&current| groups[current].sources.len() < group.sources.len());
        if replace {
            best.insert(group.language.clone(), index);
        }
    }

    if !best.contains_key("") {
        return;
    }
    let Some(&fallback_index) = best.get("CXX").or_else(|| best.get("C")).or_else(|| best.get("")) else {
        return;
    };
    let fallback = groups[fallback_index].clone();
    let language = if fallback.language.is_empty() {
        "CXX".to_owned()
    } else {
        fallback.language.clone()
    };

    for (index, group) in groups.iter_mut().enumerate() {
        if !group.language.is_empty() {
            continue;
        }
        group.language.clone_from(&language);
        if index == fallback_index || group.has_settings() {
            continue;
        }
        group.include_path.clone_from(&fallback.include_path);
        group.defines.clone_from(&fallback.defines);
        group.compile_flags.clone_from(&fallback.compile_flags);
    }
}

fn extract_target(target: &ServerTarget) -> (BuildTarget, Vec<ProjectPart>, Vec<FileNode>) {
    let src = target.source_directory.as_path();
    let mut groups = target.file_groups.clone();
    fix_language_fallbacks(&mut groups);

    let target_type = TargetType::from_tool_type(&target.target_type);
    let mut build_target = BuildTarget::new(target.name.clone(), target_type);
    build_target.artifact_path = target.artifacts.first().map(|a| resolve(src, a));
    build_target.working_dir = build_target
        .artifact_path
        .as_deref()
        .and_then(Utf8Path::parent)
        .map_or_else(|| target.build_directory.clone(), Utf8Path::to_owned);
    build_target.source_dir = target.source_directory.clone();
    build_target.build_dir = target.build_directory.clone();
    build_target.backtrace = target
        .cross_references
        .backtrace
        .iter()
        .filter(|b| !b.path.as_str().is_empty())
        .map(|b| BacktraceFrame {
            path: b.path.clone(),
            line: u32::try_from(b.line).unwrap_or(0),
            function: b.name.clone(),
        })
        .collect();

    let needs_postfix = groups.len() > 1;
    let mut parts = Vec::new();
    let mut files = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        let sources: Vec<Utf8PathBuf> = group.sources.iter().map(|s| resolve(src, s)).collect();
        let flags = split_args(&group.compile_flags);
        for include in &group.include_path {
            let path = resolve(src, &include.path);
            if !build_target.include_paths.contains(&path) {
                build_target.include_paths.push(path);
            }
        }
        for flag in &flags {
            if !build_target.compile_flags.contains(flag) {
                build_target.compile_flags.push(flag.clone());
            }
        }
        for define in &group.defines {
            if !build_target.defines.contains(define) {
                build_target.defines.push(define.clone());
            }
        }
        for source in &sources {
            build_target.sources.push(source.clone());
            files.push(FileNode::classified(source.clone()).with_generated(group.is_generated));
        }

        if group.is_generated || !matches!(group.language.as_str(), "C" | "CXX" | "CUDA") {
            continue;
        }
        if sources.iter().all(|s| FileType::from_path(s) == FileType::Header) {
            tracing::debug!(target = %target.name, "Skipping all-header file group");
            continue;
        }
        parts.push(ProjectPart {
            name: if needs_postfix {
                format!("{}_cg{}", target.name, index + 1)
            } else {
                target.name.clone()
            },
            target: target.name.clone(),
            language: group.language.clone(),
            flags,
            include_paths: group
                .include_path
                .iter()
                .map(|i| IncludePath {
                    path: resolve(src, &i.path),
                    is_system: i.is_system,
                })
                .collect(),
            defines: group.defines.clone(),
            sources,
            precompiled_headers: Vec::new(),
            builds_executable: target_type == TargetType::Executable,
        });
    }
    (build_target, parts, files)
}

/// Extracts the project model from a server session.
///
/// Targets that appear in several projects are kept once.
#[must_use]
pub fn extract_server(
    replies: &ServerReplies,
    source_dir: &Utf8Path,
    build_dir: &Utf8Path,
    build_type: Option<&str>,
) -> ProjectData {
    let configurations = &replies.codemodel.configurations;
    let configuration = build_type
        .and_then(|bt| configurations.iter().find(|c| c.name.eq_ignore_ascii_case(bt)))
        .or_else(|| configurations.first());

    let inputs = CMakeFilesReply {
        paths: SourceBuildPaths {
            source: source_dir.to_owned(),
            build: build_dir.to_owned(),
        },
        inputs: replies
            .inputs
            .build_files
            .iter()
            .flat_map(|section| {
                section.sources.iter().map(|path| CMakeInput {
                    path: path.clone(),
                    is_generated: section.is_temporary,
                    is_external: false,
                    is_cmake: section.is_cmake,
                })
            })
            .collect(),
    };

    let mut project = ProjectData {
        project_name: configuration
            .and_then(|c| c.projects.first())
            .map(|p| p.name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| source_dir.file_name().map(str::to_owned))
            .unwrap_or_default(),
        cmake_inputs: extract_cmake_inputs(&inputs, source_dir, build_dir),
        cache: replies.cache.clone(),
        ..ProjectData::default()
    };

    let mut known = FxHashSet::default();
    for target in configuration
        .into_iter()
        .flat_map(|c| &c.projects)
        .flat_map(|p| &p.targets)
    {
        if !known.insert(target.name.as_str()) {
            continue;
        }
        let (build_target, parts, files) = extract_target(target);
        project.targets.push(build_target);
        project.project_parts.extend(parts);
        project.files.extend(files);
    }
    sort_and_dedup(&mut project.files);

    tracing::info!(
        project = %project.project_name,
        targets = project.targets.len(),
        parts = project.project_parts.len(),
        "Extracted server-mode project model"
    );
    project
}
