//! Deployment data from the deployment manifest.
//!
//! The manifest is a plain text file: the first line is the install prefix on
//! the device, every following `local:remote` line names one file to deploy.
//! Local paths are relative to the source directory, remote directories are
//! relative to the prefix.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::target::BuildTarget;

/// File name of the deployment manifest.
pub const DEPLOYMENT_MANIFEST: &str = "QtCreatorDeployment.txt";

/// Kind of deployed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployableKind {
    /// Plain data file.
    #[default]
    Normal,
    /// Program or shared library artifact.
    Executable,
}

/// A single file to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeployableFile {
    /// File on the host.
    pub local_path: Utf8PathBuf,
    /// Directory on the device.
    pub remote_dir: String,
    /// Kind of file.
    pub kind: DeployableKind,
}

/// Deployment data for one build configuration.
///
/// # Examples
///
/// ```
/// use cms_core::DeploymentData;
/// use camino::Utf8Path;
///
/// let data = DeploymentData::from_manifest("/opt/app\nconf/app.ini:etc\n", Utf8Path::new("/src"));
/// assert_eq!(data.prefix, "/opt/app/");
/// assert_eq!(data.files[0].local_path, "/src/conf/app.ini");
/// assert_eq!(data.files[0].remote_dir, "/opt/app/etc");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentData {
    /// Install prefix, always ending in `/` when non-empty.
    pub prefix: String,
    /// Files to deploy, in manifest order.
    pub files: Vec<DeployableFile>,
}

impl DeploymentData {
    /// Parses manifest text.
    #[must_use]
    pub fn from_manifest(text: &str, source_dir: &Utf8Path) -> Self {
        let mut lines = text.lines();
        let mut prefix = lines.next().unwrap_or_default().trim().to_owned();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        let mut data = Self {
            prefix,
            files: Vec::new(),
        };
        for line in lines {
            // Split at the last colon so drive letters stay in the local part.
            let Some((local, remote)) = line.rsplit_once(':') else {
                continue;
            };
            let local = local.trim();
            if local.is_empty() {
                continue;
            }
            let local_path = if Utf8Path::new(local).is_absolute() {
                Utf8PathBuf::from(local)
            } else {
                source_dir.join(local)
            };
            let remote_dir = format!("{}{}", data.prefix, remote.trim().trim_start_matches('/'));
            data.add_file(local_path, remote_dir, DeployableKind::Normal);
        }
        data
    }

    /// Looks for the manifest in the source directory, then the build
    /// directory, and adds the deployable targets under the prefix.
    ///
    /// Returns `Ok(None)` when neither directory has a manifest.
    pub fn from_project(
        source_dir: &Utf8Path,
        build_dir: &Utf8Path,
        targets: &[BuildTarget],
    ) -> std::io::Result<Option<Self>> {
        let candidates = [
            source_dir.join(DEPLOYMENT_MANIFEST),
            build_dir.join(DEPLOYMENT_MANIFEST),
        ];
        let Some(manifest) = candidates.iter().find(|p| p.is_file()) else {
            return Ok(None);
        };

        let text = std::fs::read_to_string(manifest)?;
        let mut data = Self::from_manifest(&text, source_dir);
        data.add_targets(targets, build_dir);
        tracing::debug!(
            manifest = %manifest,
            files = data.files.len(),
            "Loaded deployment data"
        );
        Ok(Some(data))
    }

    /// Adds a file.
    pub fn add_file(&mut self, local_path: Utf8PathBuf, remote_dir: String, kind: DeployableKind) {
        self.files.push(DeployableFile {
            local_path,
            remote_dir,
            kind,
        });
    }

    /// Returns the entry deploying `local_path`, if any.
    #[must_use]
    pub fn deployable_for_local_file(&self, local_path: &Utf8Path) -> Option<&DeployableFile> {
        self.files.iter().find(|f| f.local_path == local_path)
    }

    /// Adds executable and shared library artifacts that the manifest does
    /// not list, mirroring their build-directory layout under the prefix.
    pub fn add_targets(&mut self, targets: &[BuildTarget], build_dir: &Utf8Path) {
        for target in targets.iter().filter(|t| t.target_type.is_deployable()) {
            let Some(artifact) = &target.artifact_path else {
                continue;
            };
            if self.deployable_for_local_file(artifact).is_some() {
                continue;
            }
            let relative_dir = artifact
                .parent()
                .and_then(|dir| dir.strip_prefix(build_dir).ok())
                .map(Utf8Path::as_str)
                .unwrap_or_default();
            let remote_dir = format!("{}{relative_dir}", self.prefix);
            self.add_file(artifact.clone(), remote_dir, DeployableKind::Executable);
        }
    }
}
