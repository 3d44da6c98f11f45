//! Minimal model used when no reply can be read.

use cms_config::entries_from_cache_file;
use cms_core::{BuildTarget, FileNode, FileType, TargetType};

use crate::extract::{CMakeInputs, ProjectData};
use crate::params::BuildDirParameters;

/// Synthesizes a model with the project name, one utility target and the
/// top-level `CMakeLists.txt`.
///
/// The cache is read from `CMakeCache.txt` when one exists.
#[must_use]
pub fn fallback_model(params: &BuildDirParameters) -> ProjectData {
    let mut target = BuildTarget::new(params.project_name.clone(), TargetType::Utility);
    target.source_dir = params.source_dir.clone();
    target.build_dir = params.build_dir.clone();
    target.working_dir = params.build_dir.clone();

    let cache_file = params.cache_file();
    let cache = if cache_file.is_file() {
        entries_from_cache_file(&cache_file).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read cache for fallback model");
            Vec::new()
        })
    } else {
        Vec::new()
    };

    tracing::info!(project = %params.project_name, "Using fallback project model");
    ProjectData {
        project_name: params.project_name.clone(),
        targets: vec![target],
        cmake_inputs: CMakeInputs {
            lists: vec![FileNode::new(params.top_level_lists_file(), FileType::ProjectFile)],
            ..CMakeInputs::default()
        },
        cache,
        ..ProjectData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    #[test]
    fn test_fallback_without_cache() {
        let params = BuildDirParameters::new("/work/demo", "/work/demo-build");
        let model = fallback_model(&params);
        assert_eq!(model.project_name, "demo");
        assert_eq!(model.targets.len(), 1);
        assert_eq!(model.targets[0].target_type, TargetType::Utility);
        assert_eq!(model.tool_files().len(), 1);
        assert_eq!(model.tool_files()[0].path, "/work/demo/CMakeLists.txt");
        assert!(model.cache.is_empty());
    }

    #[test]
    fn test_fallback_reads_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let build = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(build.join("CMakeCache.txt"), "CMAKE_BUILD_TYPE:STRING=Release\n").unwrap();
        let params = BuildDirParameters::new("/work/demo", build);
        let model = fallback_model(&params);
        assert_eq!(model.cache.len(), 1);
        assert_eq!(model.cache[0].value, "Release");
    }
}
