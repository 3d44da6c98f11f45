//! Build-description reader for cmake-sync.
//!
//! The reader decides whether the external tool has to run, runs it, and
//! turns its machine-readable reply into a [`ProjectData`] model.
//!
//! # Overview
//!
//! - [`Reader`]: the uniform `{set_parameters, parse, stop, take_result}`
//!   contract over two [`Backend`]s
//! - [`fileapi`]: query setup, reply discovery and the reply objects
//! - [`extract`]: targets, code-model parts and configure inputs
//! - [`server`]: the legacy server-mode protocol
//! - [`DiagnosticsParser`]: tool stderr into [`Diagnostic`]s
//! - [`RunDecision`]: run the tool or re-read the last reply
//!
//! Every failure is non-fatal to the process. A parse that cannot read a
//! reply still produces a fallback model; the failure travels next to it
//! in [`ParseOutcome::error`].
//!
//! # Example
//!
//! ```no_run
//! use cms_reader::{BuildDirParameters, ParseRequest, Reader};
//!
//! # async fn example() {
//! let reader = Reader::new(BuildDirParameters::new("/src/demo", "/src/demo/build"));
//! reader.parse(ParseRequest::default()).await;
//! if let Some(outcome) = reader.take_result() {
//!     println!("{} targets", outcome.data.targets.len());
//! }
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod args;
pub mod backup;
pub mod decision;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod fileapi;
pub mod params;
pub mod process;
pub mod server;
pub mod server_model;

pub use args::{join_args, quote_arg, split_args};
pub use backup::ReplyBackup;
pub use decision::{RunDecision, RunInputs, RunReason};
pub use diagnostics::{Diagnostic, DiagnosticsParser, Severity};
pub use error::{ErrorClass, ReaderError};
pub use extract::{CMakeInputs, ProjectData, extract};
pub use fallback::fallback_model;
pub use fileapi::{FileApiData, read_reply, write_query};
pub use params::{BuildDirParameters, TOOLCHAIN_OVERRIDE_FILE_NAME, ToolchainOverride};
pub use process::{ToolCommand, run_tool};
pub use server::{ServerCodec, ServerReplies, ServerSession, run_server};
pub use server_model::extract_server;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use camino::Utf8PathBuf;
use cms_core::{ReparseFlags, ToolConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fileapi::{find_latest_index, modified, reply_dir};

/// How the reader talks to the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Query files and a JSON reply directory.
    FileApi,
    /// The legacy stdio server.
    ServerMode,
}

impl Backend {
    /// Selects the backend from the tool's capability.
    #[must_use]
    pub const fn for_tool(tool: &ToolConfig) -> Self {
        if tool.server_mode {
            Self::ServerMode
        } else {
            Self::FileApi
        }
    }
}

/// Force flags of one parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseRequest {
    /// Run the tool even if the reply is current.
    pub force_tool_run: bool,
    /// Pass the initial configuration arguments.
    pub force_initial_config: bool,
    /// Pass the pending configuration delta.
    pub force_extra_config: bool,
}

impl ParseRequest {
    /// Picks the force flags out of a reparse flag set.
    #[must_use]
    pub const fn from_flags(flags: ReparseFlags) -> Self {
        Self {
            force_tool_run: flags.contains(ReparseFlags::FORCE_TOOL_RUN),
            force_initial_config: flags.contains(ReparseFlags::FORCE_INITIAL_CONFIG),
            force_extra_config: flags.contains(ReparseFlags::FORCE_EXTRA_CONFIG),
        }
    }
}

/// Completion signal of [`Reader::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// The model was read without error.
    DataAvailable,
    /// Something failed; the outcome still carries a model.
    ErrorOccurred,
}

/// Everything one parse produced, delivered as a single value.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// The project model, possibly the fallback model.
    pub data: ProjectData,
    /// The first failure of the parse.
    pub error: Option<ReaderError>,
    /// Diagnostics parsed from the tool's output.
    pub diagnostics: Vec<Diagnostic>,
    /// Tool output that was neither a diagnostic nor progress.
    pub output: Vec<String>,
    /// Whether the tool ran.
    pub ran_tool: bool,
    /// Whether `data` is the fallback model.
    pub used_fallback: bool,
    /// Timestamp of the reply index that was read.
    pub reply_time: Option<SystemTime>,
}

impl ParseOutcome {
    /// Returns the completion signal for this outcome.
    #[must_use]
    pub const fn status(&self) -> ParseStatus {
        if self.error.is_none() {
            ParseStatus::DataAvailable
        } else {
            ParseStatus::ErrorOccurred
        }
    }

    /// Returns the error message, prefixed like the tool's own errors.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

struct ReaderInner {
    params: RwLock<BuildDirParameters>,
    cancel: Mutex<CancellationToken>,
    result: Mutex<Option<ParseOutcome>>,
    last_reply: Mutex<Option<SystemTime>>,
    tracked_inputs: RwLock<Vec<Utf8PathBuf>>,
    parsing: AtomicBool,
}

/// Reads one build directory.
///
/// Cheaply cloneable; clones share state, so one clone can [`stop`] a
/// parse running on another.
///
/// [`stop`]: Reader::stop
#[derive(Clone)]
pub struct Reader {
    inner: Arc<ReaderInner>,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let build_dir = self.inner.params.read().build_dir.clone();
        f.debug_struct("Reader")
            .field("build_dir", &build_dir)
            .field("backend", &self.backend())
            .field("parsing", &self.is_parsing())
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Creates a reader for `params`.
    #[must_use]
    pub fn new(params: BuildDirParameters) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                params: RwLock::new(params),
                cancel: Mutex::new(CancellationToken::new()),
                result: Mutex::new(None),
                last_reply: Mutex::new(None),
                tracked_inputs: RwLock::new(Vec::new()),
                parsing: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the backend selected by the current tool.
    #[must_use]
    pub fn backend(&self) -> Backend {
        Backend::for_tool(&self.inner.params.read().tool)
    }

    /// Returns a copy of the current parameters.
    #[must_use]
    pub fn parameters(&self) -> BuildDirParameters {
        self.inner.params.read().clone()
    }

    /// Replaces the parameters.
    ///
    /// Returns `false` if the new parameters are incompatible with the old
    /// ones; the reader then forgets what it knew about the old reply.
    pub fn set_parameters(&self, params: BuildDirParameters) -> bool {
        let mut current = self.inner.params.write();
        let compatible = current.is_compatible(&params);
        if !compatible {
            debug!(build_dir = %params.build_dir, "Reader parameters changed");
            *self.inner.last_reply.lock() = None;
            self.inner.tracked_inputs.write().clear();
        }
        *current = params;
        compatible
    }

    /// Returns `true` while a parse is in flight.
    #[must_use]
    pub fn is_parsing(&self) -> bool {
        self.inner.parsing.load(Ordering::Acquire)
    }

    /// Cancels the parse in flight. The tool process is killed.
    pub fn stop(&self) {
        self.inner.cancel.lock().cancel();
    }

    /// Takes the outcome of the last parse.
    pub fn take_result(&self) -> Option<ParseOutcome> {
        self.inner.result.lock().take()
    }

    /// Returns `true` if a reply newer than the last consumed one exists
    /// while no parse is running.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        if self.is_parsing() || self.backend() == Backend::ServerMode {
            return false;
        }
        let build_dir = self.inner.params.read().build_dir.clone();
        let Some(current) = find_latest_index(&reply_dir(&build_dir)).and_then(|p| modified(&p)) else {
            return false;
        };
        self.inner.last_reply.lock().is_none_or(|last| current > last)
    }

    /// Runs one parse and stores its outcome for [`Reader::take_result`].
    pub async fn parse(&self, request: ParseRequest) -> ParseStatus {
        self.parse_with(request, CancellationToken::new()).await
    }

    /// Runs one parse that `cancel` can abort, including before it starts.
    ///
    /// A parse whose token is already cancelled stores a cancelled outcome
    /// without touching the build directory. [`Reader::stop`] cancels the
    /// token too.
    pub async fn parse_with(&self, request: ParseRequest, cancel: CancellationToken) -> ParseStatus {
        *self.inner.cancel.lock() = cancel.clone();
        let params = self.parameters();
        if cancel.is_cancelled() {
            debug!(build_dir = %params.build_dir, "Parse cancelled before it started");
            let outcome = ParseOutcome {
                data: fallback_model(&params),
                error: Some(ReaderError::Cancelled),
                used_fallback: true,
                ..ParseOutcome::default()
            };
            let status = outcome.status();
            *self.inner.result.lock() = Some(outcome);
            return status;
        }
        self.inner.parsing.store(true, Ordering::Release);

        let outcome = match Backend::for_tool(&params.tool) {
            Backend::FileApi => self.parse_file_api(&params, request, &cancel).await,
            Backend::ServerMode => parse_server_mode(&params, request, &cancel).await,
        };

        if !outcome.used_fallback {
            *self.inner.tracked_inputs.write() = outcome
                .data
                .cmake_inputs
                .iter()
                .filter(|n| !n.is_generated)
                .map(|n| n.path.clone())
                .collect();
        }
        if outcome.reply_time.is_some() {
            *self.inner.last_reply.lock() = outcome.reply_time;
        }
        let status = outcome.status();
        match &outcome.error {
            None => info!(
                targets = outcome.data.targets.len(),
                files = outcome.data.files.len(),
                ran_tool = outcome.ran_tool,
                "Parse finished"
            ),
            Some(e) => warn!(error = %e, fallback = outcome.used_fallback, "Parse failed"),
        }
        *self.inner.result.lock() = Some(outcome);
        self.inner.parsing.store(false, Ordering::Release);
        status
    }

    async fn parse_file_api(
        &self,
        params: &BuildDirParameters,
        request: ParseRequest,
        cancel: &CancellationToken,
    ) -> ParseOutcome {
        let mut parser = DiagnosticsParser::new().with_source_dir(params.source_dir.clone());
        let mut outcome = ParseOutcome::default();

        if let Err(e) = write_query(&params.build_dir) {
            outcome.error = Some(e);
            outcome.data = fallback_model(params);
            outcome.used_fallback = true;
            return outcome;
        }

        let args = params.tool_arguments(request.force_initial_config, request.force_extra_config);
        let tracked = self.inner.tracked_inputs.read().clone();
        let inputs = RunInputs {
            force: request.force_tool_run,
            has_arguments: !args.is_empty(),
            auto_run: params.tool.auto_run,
            ..RunInputs::from_disk(&params.build_dir, tracked.iter().map(Utf8PathBuf::as_path))
        };

        if let RunDecision::Run(reason) = RunDecision::evaluate(&inputs) {
            info!(reason = ?reason, "Configuring project");
            outcome.ran_tool = true;
            let backup = ReplyBackup::create(&params.build_dir)
                .inspect_err(|e| warn!(error = %e, "Failed to back up previous reply"))
                .ok();
            let command = ToolCommand::configure(params, args);
            if let Err(e) = run_tool(&command, &mut parser, cancel).await {
                if let Some(backup) = backup {
                    if let Err(restore) = backup.restore() {
                        warn!(error = %restore, "Failed to restore previous reply");
                    }
                }
                outcome.error = Some(e);
            }
        } else {
            debug!("Reply is current, re-reading it");
        }
        outcome.diagnostics = parser.take_diagnostics();
        outcome.output = parser.take_output();

        if matches!(outcome.error, Some(ReaderError::Cancelled)) {
            outcome.data = fallback_model(params);
            outcome.used_fallback = true;
            return outcome;
        }

        let (source_dir, build_dir) = (params.source_dir.clone(), params.build_dir.clone());
        let build_type = params.build_type.clone();
        let read = tokio::task::spawn_blocking(move || {
            let data = read_reply(&build_dir, build_type.as_deref())?;
            Ok::<_, ReaderError>((extract(&data, &source_dir, &build_dir), modified(&data.index_file)))
        })
        .await
        .unwrap_or_else(|e| Err(ReaderError::malformed(reply_dir(&params.build_dir), e)));

        match read {
            Ok((data, reply_time)) => {
                outcome.data = data;
                outcome.reply_time = reply_time;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read reply");
                outcome.error.get_or_insert(e);
                outcome.data = fallback_model(params);
                outcome.used_fallback = true;
            }
        }
        outcome
    }
}

async fn parse_server_mode(
    params: &BuildDirParameters,
    request: ParseRequest,
    cancel: &CancellationToken,
) -> ParseOutcome {
    let mut parser = DiagnosticsParser::new().with_source_dir(params.source_dir.clone());
    let args = params.tool_arguments(request.force_initial_config, request.force_extra_config);
    let mut outcome = ParseOutcome {
        ran_tool: true,
        ..ParseOutcome::default()
    };

    match run_server(params, &args, &mut parser, cancel).await {
        Ok(replies) if replies.error.is_none() => {
            outcome.data = extract_server(
                &replies,
                &params.source_dir,
                &params.build_dir,
                params.build_type.as_deref(),
            );
        }
        Ok(mut replies) => {
            outcome.data = fallback_model(params);
            if !replies.cache.is_empty() {
                outcome.data.cache = std::mem::take(&mut replies.cache);
            }
            outcome.used_fallback = true;
            outcome.error = replies.error;
        }
        Err(e) => {
            outcome.data = fallback_model(params);
            outcome.used_fallback = true;
            outcome.error = Some(e);
        }
    }
    outcome.diagnostics = parser.take_diagnostics();
    outcome.output = parser.take_output();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileapi::tests::write_sample_reply;
    use camino::Utf8Path;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Utf8PathBuf, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let (src, build) = (root.join("src"), root.join("build"));
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("CMakeLists.txt"), "project(Demo)\n").unwrap();
        (dir, src, build)
    }

    fn missing_tool(src: &Utf8Path, build: &Utf8Path) -> BuildDirParameters {
        let tool = ToolConfig {
            program: src.join("no-such-cmake"),
            ..ToolConfig::default()
        };
        BuildDirParameters::new(src, build).with_tool(tool)
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_the_parse() {
        let (_dir, src, build) = setup();
        let reader = Reader::new(missing_tool(&src, &build));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = reader
            .parse_with(ParseRequest::from_flags(ReparseFlags::FORCE_TOOL_RUN), cancel)
            .await;
        assert_eq!(status, ParseStatus::ErrorOccurred);
        let outcome = reader.take_result().unwrap();
        assert!(matches!(outcome.error, Some(ReaderError::Cancelled)));
        assert!(outcome.used_fallback);
        assert!(!outcome.ran_tool);
        assert!(!build.join(".cmake").exists());
        assert!(!reader.is_parsing());
    }

    #[tokio::test]
    async fn test_current_reply_is_read_without_running_tool() {
        let (_dir, src, build) = setup();
        write_query(&build).unwrap();
        write_sample_reply(&build, &src);

        let reader = Reader::new(missing_tool(&src, &build));
        assert_eq!(reader.parse(ParseRequest::default()).await, ParseStatus::DataAvailable);
        let outcome = reader.take_result().unwrap();
        assert!(!outcome.ran_tool);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.data.project_name, "Demo");
        assert_eq!(outcome.data.targets.len(), 2);
        assert!(reader.take_result().is_none());
        assert!(!reader.is_dirty());
    }

    #[tokio::test]
    async fn test_missing_tool_produces_fallback() {
        let (_dir, src, build) = setup();
        let reader = Reader::new(missing_tool(&src, &build));
        let request = ParseRequest {
            force_tool_run: true,
            ..ParseRequest::default()
        };
        assert_eq!(reader.parse(request).await, ParseStatus::ErrorOccurred);

        let outcome = reader.take_result().unwrap();
        assert!(outcome.ran_tool);
        assert!(outcome.used_fallback);
        assert!(outcome.error.as_ref().unwrap().is_fatal());
        assert_eq!(outcome.data.targets.len(), 1);
        assert_eq!(outcome.data.tool_files()[0].path, src.join("CMakeLists.txt"));
    }

    #[tokio::test]
    async fn test_newer_reply_marks_dirty() {
        let (_dir, src, build) = setup();
        write_query(&build).unwrap();
        write_sample_reply(&build, &src);
        let reader = Reader::new(missing_tool(&src, &build));
        reader.parse(ParseRequest::default()).await;
        assert!(!reader.is_dirty());

        let index = find_latest_index(&reply_dir(&build)).unwrap();
        let file = std::fs::File::options().append(true).open(&index).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        assert!(reader.is_dirty());
    }

    #[test]
    fn test_incompatible_parameters_reset_state() {
        let reader = Reader::new(BuildDirParameters::new("/s", "/b"));
        assert!(reader.set_parameters(BuildDirParameters::new("/s", "/b").with_extra_arguments(["-DX:BOOL=ON"])));
        assert!(!reader.set_parameters(BuildDirParameters::new("/s", "/other")));
        assert_eq!(reader.parameters().build_dir, "/other");
        assert_eq!(reader.backend(), Backend::FileApi);
    }

    #[test]
    fn test_request_from_flags() {
        let flags = ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_EXTRA_CONFIG;
        let request = ParseRequest::from_flags(flags);
        assert!(request.force_tool_run);
        assert!(!request.force_initial_config);
        assert!(request.force_extra_config);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_configure_keeps_previous_reply() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, src, build) = setup();
        write_query(&build).unwrap();
        write_sample_reply(&build, &src);
        let script = src.join("fake-cmake");
        std::fs::write(&script, "#!/bin/sh\necho 'CMake Error: broken cache' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tool = ToolConfig {
            program: script,
            ..ToolConfig::default()
        };
        let params = BuildDirParameters::new(&src, &build)
            .with_tool(tool)
            .with_extra_arguments(["-DBROKEN:BOOL=ON"]);
        let reader = Reader::new(params);
        let request = ParseRequest {
            force_extra_config: true,
            ..ParseRequest::default()
        };
        assert_eq!(reader.parse(request).await, ParseStatus::ErrorOccurred);

        let outcome = reader.take_result().unwrap();
        assert_eq!(outcome.error_message().unwrap(), "CMake returned error code: 1");
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.data.targets.len(), 2);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(reply_dir(&build).is_dir());
    }
}
