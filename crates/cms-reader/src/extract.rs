//! Extraction of the normalized project model from a file API reply.
//!
//! Every target is extracted independently (in parallel with `rayon`) into
//! a [`BuildTarget`], its [`ProjectPart`]s and its source nodes. The
//! configure inputs become project-file nodes split by location.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cms_config::ConfigEntry;
use cms_core::types::file::sort_and_dedup;
use cms_core::{
    BacktraceFrame, BuildTarget, FileNode, FileType, FxHashMap, IncludePath, ProjectPart,
    TargetType,
};
use rayon::prelude::*;
use serde::Serialize;

use crate::args::split_args;
use crate::fileapi::{BacktraceGraph, CMakeFilesReply, CompileGroup, FileApiData, TargetReply};

/// Library directories the linker searches anyway.
const SYSTEM_LIBRARY_DIRS: [&str; 5] = ["/lib", "/lib64", "/usr/lib", "/usr/lib64", "/usr/local/lib"];

/// Configure inputs split by location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CMakeInputs {
    /// `CMakeLists.txt` files.
    pub lists: Vec<FileNode>,
    /// Other inputs below the source directory.
    pub source: Vec<FileNode>,
    /// Inputs below the build directory.
    pub build: Vec<FileNode>,
    /// Inputs anywhere else.
    pub other: Vec<FileNode>,
}

impl CMakeInputs {
    /// Returns every input node.
    pub fn iter(&self) -> impl Iterator<Item = &FileNode> {
        self.lists
            .iter()
            .chain(&self.source)
            .chain(&self.build)
            .chain(&self.other)
    }

    /// Returns the number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len() + self.source.len() + self.build.len() + self.other.len()
    }

    /// Returns `true` if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The project model produced by one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectData {
    /// Display name of the project.
    pub project_name: String,
    /// Build targets in reply order.
    pub targets: Vec<BuildTarget>,
    /// Code-model parts.
    pub project_parts: Vec<ProjectPart>,
    /// Configure inputs.
    pub cmake_inputs: CMakeInputs,
    /// Target sources, sorted and unique.
    pub files: Vec<FileNode>,
    /// The tool's cache.
    pub cache: Vec<ConfigEntry>,
    /// Whether the generator is multi-config.
    pub is_multi_config: bool,
    /// Path of the test driver, if reported.
    pub ctest_path: Option<Utf8PathBuf>,
    /// Version string of the tool that wrote the reply.
    pub tool_version: String,
}

impl ProjectData {
    /// Returns every file the tool knows about: target sources and
    /// configure inputs.
    #[must_use]
    pub fn tool_files(&self) -> Vec<FileNode> {
        let mut files: Vec<FileNode> = self
            .cmake_inputs
            .iter()
            .chain(&self.files)
            .cloned()
            .collect();
        sort_and_dedup(&mut files);
        files
    }
}

/// Lexically normalizes `path` (drops `.`, folds `..`).
#[must_use]
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Resolves a possibly relative path against `base` and normalizes it.
#[must_use]
pub fn resolve(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    normalize(&base.join(path))
}

fn is_pch_file(build_dir: &Utf8Path, path: &Utf8Path) -> bool {
    path.starts_with(build_dir) && path.file_name().is_some_and(|n| n.starts_with("cmake_pch"))
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Splits the configure inputs by location.
///
/// Files belonging to the tool installation are skipped, except
/// `CMakeLists.txt` files, which are also never marked generated.
#[must_use]
pub fn extract_cmake_inputs(
    reply: &CMakeFilesReply,
    source_dir: &Utf8Path,
    build_dir: &Utf8Path,
) -> CMakeInputs {
    let mut inputs = CMakeInputs::default();
    for input in &reply.inputs {
        let path = resolve(source_dir, &input.path);
        let is_lists = path.file_name() == Some("CMakeLists.txt");
        if input.is_cmake && !is_lists {
            continue;
        }
        let node = FileNode::new(path, FileType::ProjectFile).with_generated(input.is_generated && !is_lists);
        if is_lists {
            inputs.lists.push(node);
        } else if node.path.starts_with(build_dir) {
            inputs.build.push(node);
        } else if node.path.starts_with(source_dir) {
            inputs.source.push(node);
        } else {
            inputs.other.push(node);
        }
    }
    for group in [&mut inputs.lists, &mut inputs.source, &mut inputs.build, &mut inputs.other] {
        sort_and_dedup(group);
    }
    inputs
}

/// Follows the backtrace chain from `node`, skipping nodes without a
/// command.
#[must_use]
pub fn extract_backtrace(
    graph: &BacktraceGraph,
    node: Option<usize>,
    source_dir: &Utf8Path,
) -> Vec<BacktraceFrame> {
    let mut frames = Vec::new();
    let mut current = node;
    // A malformed graph could loop; bound the walk by the node count.
    let mut budget = graph.nodes.len();
    while let Some(index) = current {
        let Some(n) = graph.nodes.get(index) else {
            break;
        };
        if budget == 0 {
            break;
        }
        budget -= 1;
        if let Some(function) = n.command.and_then(|c| graph.commands.get(c)) {
            let path = graph
                .files
                .get(n.file)
                .map(|f| resolve(source_dir, f))
                .unwrap_or_default();
            frames.push(BacktraceFrame {
                path,
                line: n.line.unwrap_or(0),
                function: function.clone(),
            });
        }
        current = n.parent;
    }
    frames
}

struct ExtractContext<'a> {
    source_dir: &'a Utf8Path,
    build_dir: &'a Utf8Path,
    link_base_is_top: bool,
    names_by_id: FxHashMap<&'a str, &'a str>,
}

fn library_directories(ctx: &ExtractContext<'_>, target: &TargetReply, target_build: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Some(link) = &target.link else {
        return Vec::new();
    };
    let base = if ctx.link_base_is_top {
        ctx.build_dir
    } else {
        target_build
    };

    let mut dirs = Vec::new();
    for fragment in link.command_fragments.iter().filter(|f| f.role != "flags") {
        for part in split_args(&fragment.fragment) {
            let part = if fragment.role == "libraryPath" {
                part.strip_prefix("-LIBPATH:")
                    .or_else(|| part.strip_prefix("-L"))
                    .unwrap_or(&part)
                    .to_owned()
            } else {
                part
            };
            if part.is_empty() || part.starts_with('-') {
                continue;
            }
            let mut path = resolve(base, Utf8Path::new(&part));
            if fragment.role == "libraries" {
                match path.parent() {
                    Some(parent) => path = parent.to_owned(),
                    None => continue,
                }
            }
            if cfg!(target_os = "linux") && SYSTEM_LIBRARY_DIRS.contains(&path.as_str()) {
                continue;
            }
            if path.is_dir() {
                push_unique(&mut dirs, path);
            }
        }
    }
    dirs
}

/// Removes the flags that make the compiler use the tool's precompiled
/// header.
fn strip_pch_flags(flags: &mut Vec<String>, header: &Utf8Path) {
    let header = header.as_str();
    let patterns: [Vec<String>; 5] = [
        vec!["-Xclang".into(), "-include-pch".into(), "-Xclang".into(), format!("{header}.gch")],
        vec!["-Xclang".into(), "-include-pch".into(), "-Xclang".into(), format!("{header}.pch")],
        vec!["-Xclang".into(), "-include".into(), "-Xclang".into(), header.to_owned()],
        vec!["-include".into(), header.to_owned()],
        vec!["/FI".into(), header.to_owned()],
    ];
    for pattern in &patterns {
        if let Some(pos) = flags.windows(pattern.len()).position(|w| w == pattern.as_slice()) {
            flags.drain(pos..pos + pattern.len());
        }
    }
}

fn is_header_only(group: &CompileGroup, target: &TargetReply) -> bool {
    group.defines.is_empty()
        && group.includes.is_empty()
        && group.source_indexes.iter().all(|&i| {
            target
                .sources
                .get(i)
                .is_some_and(|s| FileType::from_path(&s.path) == FileType::Header)
        })
}

fn project_parts(ctx: &ExtractContext<'_>, target: &TargetReply) -> Vec<ProjectPart> {
    let needs_postfix = target.compile_groups.len() > 1;
    let mut count = 1;
    let mut parts = Vec::new();

    for group in &target.compile_groups {
        if !matches!(group.language.as_str(), "C" | "CXX" | "CUDA") {
            continue;
        }
        if is_header_only(group, target) {
            tracing::debug!(target = %target.name, "Skipping all-header compile group");
            continue;
        }

        let mut sources: Vec<Utf8PathBuf> = group
            .source_indexes
            .iter()
            .filter_map(|&i| target.sources.get(i))
            .filter(|s| !s.is_generated)
            .map(|s| resolve(ctx.source_dir, &s.path))
            .collect();
        let has_pch_source = sources.iter().any(|s| is_pch_file(ctx.build_dir, s));
        if !has_pch_source {
            for source in target.sources.iter().filter(|s| !s.is_generated) {
                if FileType::from_path(&source.path) == FileType::Header {
                    push_unique(&mut sources, resolve(ctx.source_dir, &source.path));
                }
            }
        }
        sources.retain(|s| !is_pch_file(ctx.build_dir, s));

        let mut flags: Vec<String> = group
            .compile_command_fragments
            .iter()
            .flat_map(|f| split_args(&f.fragment))
            .collect();

        let ending = match group.language.as_str() {
            "C" => Some("/cmake_pch.h"),
            "CXX" => Some("/cmake_pch.hxx"),
            _ => None,
        };
        let mut precompiled_headers = Vec::new();
        if let Some(header) = ending.and_then(|ending| {
            target
                .sources
                .iter()
                .find(|s| s.path.as_str().ends_with(ending))
        }) {
            let header = resolve(ctx.source_dir, &header.path);
            strip_pch_flags(&mut flags, &header);
            precompiled_headers.push(header);
        }

        let name = if needs_postfix {
            format!("{}_cg{count}", target.name)
        } else {
            target.name.clone()
        };
        count += 1;

        parts.push(ProjectPart {
            name,
            target: target.name.clone(),
            language: group.language.clone(),
            flags,
            include_paths: group
                .includes
                .iter()
                .map(|i| IncludePath {
                    path: resolve(ctx.source_dir, &i.path),
                    is_system: i.is_system,
                })
                .collect(),
            defines: group.defines.iter().map(|d| d.define.clone()).collect(),
            sources,
            precompiled_headers,
            builds_executable: target.target_type == "EXECUTABLE",
        });
    }
    parts
}

fn extract_target(ctx: &ExtractContext<'_>, target: &TargetReply) -> (BuildTarget, Vec<ProjectPart>, Vec<FileNode>) {
    let target_type = TargetType::from_tool_type(&target.target_type);
    let target_build = resolve(ctx.build_dir, &target.paths.build);

    let mut build_target = BuildTarget::new(target.name.clone(), target_type);
    build_target.artifact_path = target
        .artifacts
        .first()
        .map(|a| resolve(ctx.build_dir, &a.path));
    build_target.working_dir = build_target
        .artifact_path
        .as_deref()
        .and_then(Utf8Path::parent)
        .map_or_else(|| target_build.clone(), Utf8Path::to_owned);
    build_target.source_dir = resolve(ctx.source_dir, &target.paths.source);
    build_target.backtrace = extract_backtrace(&target.backtrace_graph, target.backtrace, ctx.source_dir);
    build_target.dependencies = target
        .dependencies
        .iter()
        .filter_map(|d| ctx.names_by_id.get(d.id.as_str()))
        .map(|name| (*name).to_owned())
        .collect();

    for group in &target.compile_groups {
        for include in &group.includes {
            push_unique(&mut build_target.include_paths, resolve(ctx.source_dir, &include.path));
        }
        for fragment in &group.compile_command_fragments {
            for flag in split_args(&fragment.fragment) {
                push_unique(&mut build_target.compile_flags, flag);
            }
        }
        for define in &group.defines {
            push_unique(&mut build_target.defines, define.define.clone());
        }
    }

    let mut files = Vec::with_capacity(target.sources.len());
    for source in &target.sources {
        let path = resolve(ctx.source_dir, &source.path);
        if is_pch_file(ctx.build_dir, &path) {
            continue;
        }
        build_target.sources.push(path.clone());
        files.push(FileNode::classified(path).with_generated(source.is_generated));
    }

    if target_type == TargetType::Executable {
        build_target.library_directories = library_directories(ctx, target, &target_build);
    }
    build_target.build_dir = target_build;

    let parts = project_parts(ctx, target);
    (build_target, parts, files)
}

/// Returns the top-level project name, else the source directory name.
fn project_name(data: &FileApiData, source_dir: &Utf8Path) -> String {
    data.configuration
        .projects
        .iter()
        .find(|p| p.parent_index.is_none())
        .map(|p| p.name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| source_dir.file_name().map(str::to_owned))
        .unwrap_or_default()
}

/// Extracts the project model from a reply.
#[must_use]
pub fn extract(data: &FileApiData, source_dir: &Utf8Path, build_dir: &Utf8Path) -> ProjectData {
    let ctx = ExtractContext {
        source_dir,
        build_dir,
        link_base_is_top: data.tool.generator.name.contains("Ninja")
            && data.tool.version.at_least(3, 20, 5),
        names_by_id: data
            .targets
            .iter()
            .map(|t| (t.id.as_str(), t.name.as_str()))
            .collect(),
    };

    let extracted: Vec<_> = data
        .targets
        .par_iter()
        .map(|t| extract_target(&ctx, t))
        .collect();

    let mut project = ProjectData {
        project_name: project_name(data, source_dir),
        cmake_inputs: extract_cmake_inputs(&data.cmake_files, source_dir, build_dir),
        cache: data.cache.clone(),
        is_multi_config: data.tool.generator.multi_config,
        ctest_path: data.tool.paths.ctest.clone(),
        tool_version: data.tool.version.string.clone(),
        ..ProjectData::default()
    };
    for (target, parts, files) in extracted {
        project.targets.push(target);
        project.project_parts.extend(parts);
        project.files.extend(files);
    }
    sort_and_dedup(&mut project.files);

    tracing::info!(
        project = %project.project_name,
        targets = project.targets.len(),
        parts = project.project_parts.len(),
        files = project.files.len(),
        inputs = project.cmake_inputs.len(),
        "Extracted project model"
    );
    project
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileapi::tests::write_sample_reply;
    use crate::fileapi::{BacktraceNode, Fragment, SourceInfo, read_reply};
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Utf8Path::new("/a/./b/../c")), "/a/c");
        assert_eq!(resolve(Utf8Path::new("/src"), Utf8Path::new(".")), "/src");
        assert_eq!(resolve(Utf8Path::new("/src"), Utf8Path::new("/abs/x.h")), "/abs/x.h");
        assert_eq!(normalize(Utf8Path::new("../x")), "../x");
    }

    #[test]
    fn test_backtrace_skips_nodes_without_command() {
        let graph = BacktraceGraph {
            nodes: vec![
                BacktraceNode { file: 0, line: None, command: None, parent: None },
                BacktraceNode { file: 1, line: Some(12), command: Some(1), parent: Some(0) },
                BacktraceNode { file: 2, line: Some(4), command: Some(0), parent: Some(1) },
            ],
            commands: vec!["add_executable".into(), "my_helper".into()],
            files: vec!["CMakeLists.txt".into(), "cmake/Helpers.cmake".into(), "app/CMakeLists.txt".into()],
        };
        let frames = extract_backtrace(&graph, Some(2), Utf8Path::new("/src"));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "add_executable");
        assert_eq!(frames[0].path, "/src/app/CMakeLists.txt");
        assert_eq!(frames[0].line, 4);
        assert_eq!(frames[1].function, "my_helper");
        assert!(extract_backtrace(&graph, None, Utf8Path::new("/src")).is_empty());
    }

    #[test]
    fn test_backtrace_cycle_terminates() {
        let graph = BacktraceGraph {
            nodes: vec![BacktraceNode { file: 0, line: Some(1), command: Some(0), parent: Some(0) }],
            commands: vec!["add_library".into()],
            files: vec!["CMakeLists.txt".into()],
        };
        assert_eq!(extract_backtrace(&graph, Some(0), Utf8Path::new("/s")).len(), 1);
    }

    #[test]
    fn test_strip_pch_flags() {
        let header = Utf8Path::new("/b/CMakeFiles/app.dir/cmake_pch.hxx");
        let mut flags: Vec<String> = [
            "-O2",
            "-Xclang",
            "-include-pch",
            "-Xclang",
            "/b/CMakeFiles/app.dir/cmake_pch.hxx.pch",
            "-include",
            "/b/CMakeFiles/app.dir/cmake_pch.hxx",
            "-Wall",
        ]
        .map(String::from)
        .to_vec();
        strip_pch_flags(&mut flags, header);
        assert_eq!(flags, ["-O2", "-Wall"]);
    }

    #[test]
    fn test_cmake_inputs_split() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let (src, build) = (root.join("src"), root.join("build"));
        write_sample_reply(&build, &src);
        let data = read_reply(&build, None).unwrap();

        let inputs = extract_cmake_inputs(&data.cmake_files, &src, &build);
        let names = |nodes: &[FileNode]| -> Vec<String> {
            nodes.iter().map(|n| n.path.file_name().unwrap_or_default().to_owned()).collect()
        };
        assert_eq!(names(&inputs.lists), ["CMakeLists.txt", "CMakeLists.txt"]);
        assert_eq!(names(&inputs.source), ["Deps.cmake"]);
        assert_eq!(names(&inputs.build), ["CMakeSystem.cmake"]);
        assert_eq!(names(&inputs.other), ["SdkConfig.cmake"]);
        assert!(inputs.build[0].is_generated);
        assert!(inputs.lists.iter().all(|n| !n.is_generated && n.file_type == FileType::ProjectFile));
    }

    #[test]
    fn test_extract_sample_project() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let (src, build) = (root.join("src"), root.join("build"));
        write_sample_reply(&build, &src);
        std::fs::create_dir_all(build.join("src")).unwrap();
        let data = read_reply(&build, None).unwrap();

        let project = extract(&data, &src, &build);
        assert_eq!(project.project_name, "Demo");
        assert_eq!(project.ctest_path.as_deref(), Some(Utf8Path::new("/usr/bin/ctest")));
        assert_eq!(project.targets.len(), 2);

        let app = &project.targets[0];
        assert_eq!(app.target_type, TargetType::Executable);
        assert_eq!(app.artifact_path, Some(build.join("src/app")));
        assert_eq!(app.working_dir, build.join("src"));
        assert_eq!(app.source_dir, src.join("src"));
        assert_eq!(app.dependencies, ["core"]);
        assert_eq!(app.backtrace.len(), 1);
        assert_eq!(app.backtrace[0].line, 3);
        assert_eq!(app.defines, ["APP_VERSION=2"]);
        assert_eq!(app.compile_flags, ["-g", "-std=gnu++17", "-DWITH_QUOTES=a b"]);
        assert_eq!(app.library_directories, [build.join("src")]);

        let core = &project.targets[1];
        assert_eq!(core.target_type, TargetType::StaticLib);
        assert!(core.library_directories.is_empty());

        let app_part = &project.project_parts[0];
        assert_eq!(app_part.name, "app");
        assert!(app_part.builds_executable);
        assert_eq!(app_part.sources, [src.join("src/main.cpp"), src.join("src/window.h")]);
        assert!(app_part.include_paths[1].is_system);

        let generated: Vec<_> = project.files.iter().filter(|f| f.is_generated).collect();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].path, build.join("src/moc_window.cpp"));
        assert!(project.tool_files().iter().any(|f| f.path == src.join("CMakeLists.txt")));
    }

    #[test]
    fn test_header_only_group_is_skipped() {
        let target = TargetReply {
            name: "headers".into(),
            target_type: "UTILITY".into(),
            sources: vec![SourceInfo {
                path: "include/a.h".into(),
                compile_group_index: Some(0),
                is_generated: false,
            }],
            compile_groups: vec![CompileGroup {
                source_indexes: vec![0],
                language: "CXX".into(),
                compile_command_fragments: vec![Fragment { fragment: "-O2".into(), role: String::new() }],
                ..CompileGroup::default()
            }],
            ..TargetReply::default()
        };
        let ctx = ExtractContext {
            source_dir: Utf8Path::new("/s"),
            build_dir: Utf8Path::new("/b"),
            link_base_is_top: false,
            names_by_id: FxHashMap::default(),
        };
        assert!(project_parts(&ctx, &target).is_empty());
    }
}
