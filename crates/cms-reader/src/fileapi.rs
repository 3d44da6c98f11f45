//! The tool's file-based API: query setup and reply reading.
//!
//! A client writes a query file below `<build>/.cmake/api/v1/query/`; on
//! every configure run the tool answers with JSON files in
//! `<build>/.cmake/api/v1/reply/`, indexed by the newest `index-*.json`.
//!
//! ```text
//! reply/
//! ├── index-2024-01-01T10-00-00-0000.json   ─► objects[]
//! ├── cache-v2-<hash>.json
//! ├── cmakeFiles-v1-<hash>.json
//! ├── codemodel-v2-<hash>.json              ─► configurations[].targets[]
//! └── target-app-Debug-<hash>.json
//! ```

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use cms_config::{ConfigEntry, ConfigType, split_value};
use rayon::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ReaderError;

/// Name of this client's query directory.
pub const CLIENT_NAME: &str = "client-cmake-sync";

/// The query this client writes.
pub const QUERY_JSON: &str = r#"{
  "requests": [
    { "kind": "cache", "version": 2 },
    { "kind": "cmakeFiles", "version": 1 },
    { "kind": "codemodel", "version": 2 }
  ]
}
"#;

/// Returns `<build>/.cmake/api/v1`.
#[must_use]
pub fn api_dir(build_dir: &Utf8Path) -> Utf8PathBuf {
    build_dir.join(".cmake").join("api").join("v1")
}

/// Returns the reply directory of `build_dir`.
#[must_use]
pub fn reply_dir(build_dir: &Utf8Path) -> Utf8PathBuf {
    api_dir(build_dir).join("reply")
}

/// Returns the path of this client's query file.
#[must_use]
pub fn query_file(build_dir: &Utf8Path) -> Utf8PathBuf {
    api_dir(build_dir)
        .join("query")
        .join(CLIENT_NAME)
        .join("query.json")
}

/// Writes the query file unless it already has the expected content.
///
/// Returns `true` if the file was (re)written. Leaving an unchanged file
/// alone keeps its timestamp older than the reply.
pub fn write_query(build_dir: &Utf8Path) -> Result<bool, ReaderError> {
    let path = query_file(build_dir);
    if std::fs::read_to_string(&path).is_ok_and(|text| text == QUERY_JSON) {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ReaderError::io(dir, e))?;
    }
    std::fs::write(&path, QUERY_JSON).map_err(|e| ReaderError::io(&path, e))?;
    tracing::debug!(path = %path, "Wrote file API query");
    Ok(true)
}

/// Returns the newest reply index in `reply_dir`.
///
/// Index names embed a timestamp, so the lexically greatest name is the
/// newest one.
#[must_use]
pub fn find_latest_index(reply_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let entries = reply_dir.read_dir_utf8().ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name();
            name.starts_with("index-") && name.ends_with(".json")
        })
        .map(|e| e.path().to_owned())
        .max()
}

/// Returns the modification time of a file, if it exists.
#[must_use]
pub fn modified(path: &Utf8Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, ReaderError> {
    let text = std::fs::read_to_string(path).map_err(|e| ReaderError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| ReaderError::malformed(path, e))
}

// ============================================================================
// Reply objects
// ============================================================================

/// The reply index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyIndex {
    /// Information about the tool that wrote the reply.
    pub cmake: ToolInfo,
    /// The reply objects.
    #[serde(default)]
    pub objects: Vec<ReplyObject>,
}

/// Tool information from the reply index.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolInfo {
    /// Tool version.
    pub version: ToolVersion,
    /// Paths of the tool's executables.
    pub paths: ToolPaths,
    /// The generator in use.
    pub generator: GeneratorInfo,
}

/// A tool version.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(default)]
pub struct ToolVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
    /// Full version string.
    pub string: String,
}

impl ToolVersion {
    /// Returns `true` if this version is at least `major.minor.patch`.
    #[must_use]
    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

/// Executable paths of the tool.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// The configure tool.
    pub cmake: Option<Utf8PathBuf>,
    /// The test driver.
    pub ctest: Option<Utf8PathBuf>,
}

/// The generator that produced the build tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorInfo {
    /// Whether the generator supports several configurations.
    pub multi_config: bool,
    /// Generator name.
    pub name: String,
}

/// One object listed in the index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyObject {
    /// Object kind (`cache`, `codemodel`, ...).
    pub kind: String,
    /// Object version.
    pub version: ObjectVersion,
    /// File name relative to the reply directory.
    pub json_file: String,
}

/// Version of a reply object.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ObjectVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
}

/// Source and build directories of a reply object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceBuildPaths {
    /// Source directory.
    pub source: Utf8PathBuf,
    /// Build directory.
    pub build: Utf8PathBuf,
}

/// The `cache` v2 object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheReply {
    /// Cache entries.
    pub entries: Vec<CacheReplyEntry>,
}

/// One entry of the `cache` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheReplyEntry {
    /// Entry key.
    pub name: String,
    /// Entry value.
    pub value: String,
    /// Entry type string.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Entry properties (`HELPSTRING`, `ADVANCED`, `STRINGS`).
    pub properties: Vec<CacheProperty>,
}

/// A cache entry property.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

impl CacheReplyEntry {
    fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Converts the entry into a [`ConfigEntry`].
    #[must_use]
    pub fn to_config_entry(&self) -> ConfigEntry {
        let mut entry = ConfigEntry::new(
            self.name.clone(),
            ConfigType::from_type_string(&self.entry_type),
            self.value.clone(),
        );
        entry.in_tool_cache = true;
        entry.is_advanced = self
            .property("ADVANCED")
            .is_some_and(|v| cms_config::to_bool(v).unwrap_or(false));
        entry.documentation = self.property("HELPSTRING").unwrap_or_default().to_owned();
        entry.allowed_values = self
            .property("STRINGS")
            .map(|v| split_value(v, true))
            .unwrap_or_default();
        entry
    }
}

/// The `cmakeFiles` v1 object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CMakeFilesReply {
    /// Top-level directories.
    pub paths: SourceBuildPaths,
    /// Every file the tool read while configuring.
    pub inputs: Vec<CMakeInput>,
}

/// One input file of the configure step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CMakeInput {
    /// Path, relative to the top source directory or absolute.
    pub path: Utf8PathBuf,
    /// Written by the configure step itself.
    pub is_generated: bool,
    /// Outside the source and build trees.
    pub is_external: bool,
    /// Part of the tool's own installation.
    #[serde(rename = "isCMake")]
    pub is_cmake: bool,
}

/// The `codemodel` v2 object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Codemodel {
    /// Top-level directories.
    pub paths: SourceBuildPaths,
    /// One entry per build configuration.
    pub configurations: Vec<Configuration>,
}

/// One build configuration of the code model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Configuration name (`Debug`, ... or empty).
    pub name: String,
    /// Build-description directories.
    pub directories: Vec<DirectoryInfo>,
    /// Projects.
    pub projects: Vec<ProjectInfo>,
    /// Targets.
    pub targets: Vec<TargetReference>,
}

/// A build-description directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryInfo {
    /// Source directory, relative to the top source directory.
    pub source: Utf8PathBuf,
    /// Build directory, relative to the top build directory.
    pub build: Utf8PathBuf,
    /// Parent directory index.
    pub parent_index: Option<usize>,
    /// Owning project index.
    pub project_index: usize,
}

/// A project of the code model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectInfo {
    /// Project name.
    pub name: String,
    /// Parent project index, absent for the top-level project.
    pub parent_index: Option<usize>,
    /// Directories of the project.
    pub directory_indexes: Vec<usize>,
    /// Targets of the project.
    pub target_indexes: Vec<usize>,
}

/// A reference to a target object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetReference {
    /// Target name.
    pub name: String,
    /// Unique target id.
    pub id: String,
    /// Defining directory index.
    pub directory_index: usize,
    /// Owning project index.
    pub project_index: usize,
    /// File name of the target object.
    pub json_file: String,
}

/// A target object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetReply {
    /// Target name.
    pub name: String,
    /// Unique target id.
    pub id: String,
    /// Target type string (`EXECUTABLE`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Backtrace node of the defining command.
    pub backtrace: Option<usize>,
    /// Target source and build directories, relative to the top ones.
    pub paths: SourceBuildPaths,
    /// Artifacts, relative to the top build directory or absolute.
    pub artifacts: Vec<Artifact>,
    /// Link step, for linkable targets.
    pub link: Option<LinkInfo>,
    /// Targets this one depends on.
    pub dependencies: Vec<DependencyInfo>,
    /// Sources.
    pub sources: Vec<SourceInfo>,
    /// Compile groups.
    pub compile_groups: Vec<CompileGroup>,
    /// Backtrace graph shared by all backtrace indexes of this target.
    pub backtrace_graph: BacktraceGraph,
}

/// An artifact path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Artifact {
    /// The path.
    pub path: Utf8PathBuf,
}

/// The link step of a target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkInfo {
    /// Link language.
    pub language: String,
    /// Command-line fragments.
    pub command_fragments: Vec<Fragment>,
}

/// A command-line fragment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fragment {
    /// The fragment text, shell-quoted.
    pub fragment: String,
    /// Role (`flags`, `libraries`, `libraryPath`, `frameworkPath`).
    pub role: String,
}

/// A target dependency.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DependencyInfo {
    /// Id of the target depended upon.
    pub id: String,
}

/// A target source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceInfo {
    /// Path, relative to the top source directory or absolute.
    pub path: Utf8PathBuf,
    /// Compile group the source belongs to, if compiled.
    pub compile_group_index: Option<usize>,
    /// Generated by the build.
    pub is_generated: bool,
}

/// Sources compiled with identical settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileGroup {
    /// Indexes into the target's sources.
    pub source_indexes: Vec<usize>,
    /// Compile language.
    pub language: String,
    /// Compile flags fragments.
    pub compile_command_fragments: Vec<Fragment>,
    /// Include directories.
    pub includes: Vec<IncludeInfo>,
    /// Precompiled headers.
    pub precompile_headers: Vec<PrecompileHeader>,
    /// Preprocessor definitions.
    pub defines: Vec<DefineInfo>,
}

/// An include directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncludeInfo {
    /// The directory.
    pub path: Utf8PathBuf,
    /// Whether it is a system include.
    pub is_system: bool,
}

/// A precompiled header.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrecompileHeader {
    /// The header.
    pub header: Utf8PathBuf,
}

/// A preprocessor definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DefineInfo {
    /// `NAME` or `NAME=VALUE`.
    pub define: String,
}

/// Backtrace nodes and the tables they index.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BacktraceGraph {
    /// Nodes.
    pub nodes: Vec<BacktraceNode>,
    /// Command names.
    pub commands: Vec<String>,
    /// File paths, relative to the top source directory or absolute.
    pub files: Vec<Utf8PathBuf>,
}

/// One backtrace node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BacktraceNode {
    /// Index into [`BacktraceGraph::files`].
    pub file: usize,
    /// Line number.
    pub line: Option<u32>,
    /// Index into [`BacktraceGraph::commands`].
    pub command: Option<usize>,
    /// Parent node.
    pub parent: Option<usize>,
}

// ============================================================================
// Reply loading
// ============================================================================

/// Everything read from one reply.
#[derive(Debug, Clone, Default)]
pub struct FileApiData {
    /// The index file that was read.
    pub index_file: Utf8PathBuf,
    /// Tool information.
    pub tool: ToolInfo,
    /// Cache entries.
    pub cache: Vec<ConfigEntry>,
    /// Configure inputs.
    pub cmake_files: CMakeFilesReply,
    /// The selected configuration.
    pub configuration: Configuration,
    /// Target objects of the selected configuration, in codemodel order.
    pub targets: Vec<TargetReply>,
}

fn object_file<'a>(
    index: &'a ReplyIndex,
    index_file: &Utf8Path,
    kind: &str,
    major: u32,
) -> Result<&'a str, ReaderError> {
    index
        .objects
        .iter()
        .find(|o| o.kind == kind && o.version.major == major)
        .map(|o| o.json_file.as_str())
        .ok_or_else(|| ReaderError::malformed(index_file, format!("no {kind} v{major} object")))
}

/// Picks the configuration matching `build_type` (case-insensitive), or the
/// first one.
#[must_use]
pub fn select_configuration(
    configurations: Vec<Configuration>,
    build_type: Option<&str>,
) -> Option<Configuration> {
    let position = build_type.and_then(|wanted| {
        configurations
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(wanted))
    });
    let mut configurations = configurations.into_iter();
    match position {
        Some(i) => configurations.nth(i),
        None => configurations.next(),
    }
}

/// Reads the newest reply of `build_dir`.
pub fn read_reply(build_dir: &Utf8Path, build_type: Option<&str>) -> Result<FileApiData, ReaderError> {
    let dir = reply_dir(build_dir);
    let index_file = find_latest_index(&dir).ok_or_else(|| ReaderError::ReplyMissing(dir.clone()))?;
    let index: ReplyIndex = read_json(&index_file)?;

    let cache_file = object_file(&index, &index_file, "cache", 2)?;
    let files_file = object_file(&index, &index_file, "cmakeFiles", 1)?;
    let codemodel_file = object_file(&index, &index_file, "codemodel", 2)?;

    let cache: CacheReply = read_json(&dir.join(cache_file))?;
    let cmake_files: CMakeFilesReply = read_json(&dir.join(files_file))?;
    let codemodel: Codemodel = read_json(&dir.join(codemodel_file))?;

    let wanted = build_type.filter(|_| index.cmake.generator.multi_config);
    let configuration = select_configuration(codemodel.configurations, wanted)
        .ok_or_else(|| ReaderError::malformed(dir.join(codemodel_file), "no configurations"))?;

    let targets = configuration
        .targets
        .par_iter()
        .map(|t| read_json::<TargetReply>(&dir.join(&t.json_file)))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        index = %index_file,
        configuration = %configuration.name,
        targets = targets.len(),
        "Read file API reply"
    );

    Ok(FileApiData {
        index_file,
        tool: index.cmake,
        cache: cache.entries.iter().map(CacheReplyEntry::to_config_entry).collect(),
        cmake_files,
        configuration,
        targets,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn write(path: &Utf8Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    /// Writes a small single-config reply: one executable and one static
    /// library, sources under `src`.
    pub(crate) fn write_sample_reply(build_dir: &Utf8Path, source_dir: &Utf8Path) {
        let reply = reply_dir(build_dir);
        write(
            &reply.join("index-2024-01-01T00-00-00-0000.json"),
            r#"{
              "cmake": {
                "version": { "major": 3, "minor": 27, "patch": 1, "string": "3.27.1" },
                "paths": { "cmake": "/usr/bin/cmake", "ctest": "/usr/bin/ctest" },
                "generator": { "multiConfig": false, "name": "Ninja" }
              },
              "objects": [
                { "kind": "codemodel", "version": { "major": 2, "minor": 6 }, "jsonFile": "codemodel-v2.json" },
                { "kind": "cache", "version": { "major": 2, "minor": 0 }, "jsonFile": "cache-v2.json" },
                { "kind": "cmakeFiles", "version": { "major": 1, "minor": 0 }, "jsonFile": "cmakeFiles-v1.json" }
              ]
            }"#,
        );
        write(
            &reply.join("cache-v2.json"),
            r#"{
              "entries": [
                { "name": "CMAKE_BUILD_TYPE", "type": "STRING", "value": "Debug",
                  "properties": [
                    { "name": "HELPSTRING", "value": "Build type" },
                    { "name": "STRINGS", "value": "Debug;Release" }
                  ] },
                { "name": "BUILD_TESTING", "type": "BOOL", "value": "ON",
                  "properties": [ { "name": "ADVANCED", "value": "1" } ] }
              ]
            }"#,
        );
        write(
            &reply.join("cmakeFiles-v1.json"),
            &format!(
                r#"{{
                  "paths": {{ "source": "{source_dir}", "build": "{build_dir}" }},
                  "inputs": [
                    {{ "path": "CMakeLists.txt" }},
                    {{ "path": "src/CMakeLists.txt" }},
                    {{ "path": "cmake/Deps.cmake" }},
                    {{ "path": "{build_dir}/CMakeFiles/3.27.1/CMakeSystem.cmake", "isGenerated": true }},
                    {{ "path": "/usr/share/cmake/Modules/CMakeCXXInformation.cmake", "isExternal": true, "isCMake": true }},
                    {{ "path": "/opt/sdk/SdkConfig.cmake", "isExternal": true }}
                  ]
                }}"#
            ),
        );
        write(
            &reply.join("codemodel-v2.json"),
            r#"{
              "paths": { "source": "/src", "build": "/build" },
              "configurations": [ {
                "name": "Debug",
                "directories": [
                  { "source": ".", "build": ".", "projectIndex": 0 },
                  { "source": "src", "build": "src", "parentIndex": 0, "projectIndex": 0 }
                ],
                "projects": [ { "name": "Demo", "directoryIndexes": [0, 1], "targetIndexes": [0, 1] } ],
                "targets": [
                  { "name": "app", "id": "app::@1", "directoryIndex": 1, "projectIndex": 0, "jsonFile": "target-app.json" },
                  { "name": "core", "id": "core::@1", "directoryIndex": 1, "projectIndex": 0, "jsonFile": "target-core.json" }
                ]
              } ]
            }"#,
        );
        write(
            &reply.join("target-app.json"),
            r#"{
              "name": "app", "id": "app::@1", "type": "EXECUTABLE", "backtrace": 1,
              "paths": { "source": "src", "build": "src" },
              "artifacts": [ { "path": "src/app" } ],
              "link": { "language": "CXX", "commandFragments": [
                { "fragment": "-g", "role": "flags" },
                { "fragment": "src/libcore.a", "role": "libraries" }
              ] },
              "dependencies": [ { "id": "core::@1" } ],
              "sources": [
                { "path": "src/main.cpp", "compileGroupIndex": 0 },
                { "path": "src/window.h" },
                { "path": "../build/src/moc_window.cpp", "compileGroupIndex": 0, "isGenerated": true }
              ],
              "compileGroups": [ {
                "language": "CXX",
                "sourceIndexes": [0, 2],
                "compileCommandFragments": [ { "fragment": "-g -std=gnu++17" }, { "fragment": "-DWITH_QUOTES=\"a b\"" } ],
                "includes": [ { "path": "/src/include" }, { "path": "/usr/include/qt", "isSystem": true } ],
                "defines": [ { "define": "APP_VERSION=2" } ]
              } ],
              "backtraceGraph": {
                "commands": [ "add_executable" ],
                "files": [ "src/CMakeLists.txt", "CMakeLists.txt" ],
                "nodes": [ { "file": 1 }, { "file": 0, "line": 3, "command": 0, "parent": 0 } ]
              }
            }"#,
        );
        write(
            &reply.join("target-core.json"),
            r#"{
              "name": "core", "id": "core::@1", "type": "STATIC_LIBRARY",
              "paths": { "source": "src", "build": "src" },
              "artifacts": [ { "path": "src/libcore.a" } ],
              "sources": [
                { "path": "src/core.c", "compileGroupIndex": 0 },
                { "path": "src/core.h" }
              ],
              "compileGroups": [ {
                "language": "C",
                "sourceIndexes": [0],
                "compileCommandFragments": [ { "fragment": "-O2" } ],
                "includes": [ { "path": "/src/src" } ]
              } ]
            }"#,
        );
    }

    #[test]
    fn test_query_file_layout() {
        assert_eq!(
            query_file(Utf8Path::new("/b")),
            "/b/.cmake/api/v1/query/client-cmake-sync/query.json"
        );
    }

    #[test]
    fn test_write_query_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let build = Utf8Path::from_path(dir.path()).unwrap();
        assert!(write_query(build).unwrap());
        assert!(!write_query(build).unwrap());
        let text = std::fs::read_to_string(query_file(build)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["requests"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_latest_index_wins() {
        let dir = TempDir::new().unwrap();
        let reply = Utf8Path::from_path(dir.path()).unwrap();
        assert!(find_latest_index(reply).is_none());
        write(&reply.join("index-2024-01-01T00-00-00-0000.json"), "{}");
        write(&reply.join("index-2024-03-01T00-00-00-0000.json"), "{}");
        write(&reply.join("codemodel-v2-x.json"), "{}");
        assert_eq!(
            find_latest_index(reply).unwrap().file_name(),
            Some("index-2024-03-01T00-00-00-0000.json")
        );
    }

    #[test]
    fn test_select_configuration() {
        let configs = || {
            ["Debug", "Release"]
                .map(|name| Configuration {
                    name: name.to_owned(),
                    ..Configuration::default()
                })
                .to_vec()
        };
        assert_eq!(select_configuration(configs(), Some("release")).unwrap().name, "Release");
        assert_eq!(select_configuration(configs(), Some("MinSizeRel")).unwrap().name, "Debug");
        assert_eq!(select_configuration(configs(), None).unwrap().name, "Debug");
        assert!(select_configuration(Vec::new(), None).is_none());
    }

    #[test]
    fn test_read_reply() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let build = root.join("build");
        write_sample_reply(&build, &root.join("src"));

        let data = read_reply(&build, Some("Release")).unwrap();
        assert_eq!(data.tool.version.string, "3.27.1");
        assert!(data.tool.version.at_least(3, 20, 5));
        assert_eq!(data.configuration.name, "Debug");
        assert_eq!(data.targets.len(), 2);
        assert_eq!(data.targets[0].compile_groups[0].includes.len(), 2);
        assert_eq!(data.cmake_files.inputs.len(), 6);

        let build_type = &data.cache[0];
        assert_eq!(build_type.allowed_values, ["Debug", "Release"]);
        assert_eq!(build_type.documentation, "Build type");
        assert!(build_type.in_tool_cache);
        assert!(data.cache[1].is_advanced);
    }

    #[test]
    fn test_read_reply_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let build = Utf8Path::from_path(dir.path()).unwrap();
        assert!(matches!(read_reply(build, None), Err(ReaderError::ReplyMissing(_))));

        write(&reply_dir(build).join("index-1.json"), r#"{ "cmake": {}, "objects": [] }"#);
        let err = read_reply(build, None).unwrap_err();
        assert!(matches!(err, ReaderError::ReplyMalformed { .. }));
        assert!(err.to_string().contains("no cache v2 object"));
    }
}
