//! The tokio driver around the [`Orchestrator`].
//!
//! One task owns every piece of mutable engine state: the reader, the
//! scanner, the watcher, the configuration model and the manual edits.
//! Host commands, job completions and timer expiries all arrive on a single
//! channel, so no lock is held across a state transition. The host only
//! sees immutable [`ProjectSnapshot`]s.

use std::sync::Arc;

use camino::Utf8PathBuf;
use cms_config::{ConfigEntry, ConfigModel, EntryError, ModelEntry, Scope, entries_from_arguments};
use cms_core::types::file::sort_and_dedup;
use cms_core::{DeploymentData, EngineConfig, FileNode, ReaderState, ReparseFlags, WatchConfig};
use cms_reader::{
    BuildDirParameters, Diagnostic, ParseOutcome, ParseRequest, ProjectData, Reader, ReaderError,
};
use cms_scanner::{ScanError, ScanResult, Scanner};
use cms_watcher::{AcceptAllFilter, DirectoryWatcher, FileEventBatch, ProjectFilter};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::configurations::{Activation, ConfigurationSet};
use crate::error::EngineError;
use crate::orchestrator::{CycleFacts, Effect, EngineEvent, Orchestrator};
use crate::reconcile::{ManualEdits, merge};
use crate::snapshot::ProjectSnapshot;

// =============================================================================
// HOST-FACING TYPES
// =============================================================================

/// Notifications the engine sends to its host.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A reparse cycle started.
    ConfigurationStarted,
    /// A new project model was published.
    DataAvailable(Arc<ProjectSnapshot>),
    /// A cycle failed. The previous model, if any, stays published.
    ErrorOccurred {
        /// Human-readable failure.
        message: String,
        /// Diagnostics the tool printed during the cycle.
        diagnostics: Vec<Diagnostic>,
    },
    /// The build directory changed without the engine asking for it.
    Dirty,
    /// The orchestrator state changed.
    StateChanged(ReaderState),
}

enum Command {
    Parse(ReparseFlags),
    ResetData,
    AddFiles(Vec<Utf8PathBuf>),
    EraseFiles(Vec<Utf8PathBuf>),
    RenameFile {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
    },
    ApplyUserEdit {
        key: String,
        value: String,
        reply: oneshot::Sender<Result<(), EntryError>>,
    },
    ToggleUnset {
        key: String,
        reply: oneshot::Sender<Result<bool, EntryError>>,
    },
    ResetUserEdits(Scope),
    Configuration(oneshot::Sender<Vec<ModelEntry>>),
    SetKit(Vec<ConfigEntry>),
    SetParameters(BuildDirParameters),
    ActivateConfiguration {
        id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    EnvironmentChanged,
    Stop,
    Shutdown,
}

enum Message {
    Command(Command),
    ScanDone {
        version: u64,
        result: Result<ScanResult, ScanError>,
    },
    ToolDone {
        version: u64,
        outcome: Option<ParseOutcome>,
    },
    ThrottleElapsed,
    DelayElapsed(u64),
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(_) => f.write_str("Command"),
            Self::ScanDone { version, .. } => write!(f, "ScanDone({version})"),
            Self::ToolDone { version, .. } => write!(f, "ToolDone({version})"),
            Self::ThrottleElapsed => f.write_str("ThrottleElapsed"),
            Self::DelayElapsed(generation) => write!(f, "DelayElapsed({generation})"),
        }
    }
}

#[derive(Debug)]
struct Shared {
    snapshot: RwLock<Option<Arc<ProjectSnapshot>>>,
    state: RwLock<ReaderState>,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable handle to a running engine.
///
/// Commands are queued and carried out in order by the engine task.
/// Commands that can be rejected are `async` and report the outcome.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx.send(Message::Command(command))?;
        Ok(())
    }

    /// Requests a reparse.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn parse(&self, flags: ReparseFlags) -> Result<(), EngineError> {
        self.send(Command::Parse(flags))
    }

    /// Drops every piece of derived state and reparses from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn reset_data(&self) -> Result<(), EngineError> {
        self.send(Command::ResetData)
    }

    /// Adds files to the project tree until the next scan reports them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn add_files<I, P>(&self, paths: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.send(Command::AddFiles(paths.into_iter().map(Into::into).collect()))
    }

    /// Removes files from the project tree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn erase_files<I, P>(&self, paths: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.send(Command::EraseFiles(paths.into_iter().map(Into::into).collect()))
    }

    /// Moves a file within the project tree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn rename_file(
        &self,
        from: impl Into<Utf8PathBuf>,
        to: impl Into<Utf8PathBuf>,
    ) -> Result<(), EngineError> {
        self.send(Command::RenameFile {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Records a pending value for a current configuration entry. Unknown
    /// keys become new entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for an empty key or a hidden entry
    /// and [`EngineError::ChannelClosed`] after shutdown.
    pub async fn apply_user_edit(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ApplyUserEdit {
            key: key.into(),
            value: value.into(),
            reply,
        })?;
        rx.await??;
        Ok(())
    }

    /// Flips the unset flag of a current configuration entry and returns
    /// the new flag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for an unknown key and
    /// [`EngineError::ChannelClosed`] after shutdown.
    pub async fn toggle_unset(&self, key: impl Into<String>) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ToggleUnset {
            key: key.into(),
            reply,
        })?;
        Ok(rx.await??)
    }

    /// Drops the pending edits in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn reset_user_edits(&self, scope: Scope) -> Result<(), EngineError> {
        self.send(Command::ResetUserEdits(scope))
    }

    /// Returns the configuration model as the engine currently holds it,
    /// pending edits included.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub async fn configuration(&self) -> Result<Vec<ModelEntry>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Configuration(reply))?;
        Ok(rx.await?)
    }

    /// Installs the kit configuration and reruns the tool.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn set_kit(&self, entries: Vec<ConfigEntry>) -> Result<(), EngineError> {
        self.send(Command::SetKit(entries))
    }

    /// Replaces the parameters of the active build configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn set_parameters(&self, params: BuildDirParameters) -> Result<(), EngineError> {
        self.send(Command::SetParameters(params))
    }

    /// Switches to another build configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownConfiguration`] if `id` was never added.
    pub async fn activate_configuration(&self, id: impl Into<String>) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ActivateConfiguration {
            id: id.into(),
            reply,
        })?;
        rx.await?
    }

    /// Tells the engine the build environment changed; the tool reruns.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn environment_changed(&self) -> Result<(), EngineError> {
        self.send(Command::EnvironmentChanged)
    }

    /// Cancels the running cycle. The last model stays published.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] after shutdown.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    /// Stops the engine and waits for it, granting a running tool the
    /// configured grace period. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] if the engine task panicked.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let _ = self.tx.send(Message::Command(Command::Shutdown));
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|_| EngineError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Returns the last published model.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ProjectSnapshot>> {
        self.shared.snapshot.read().clone()
    }

    /// Returns the current orchestrator state.
    #[must_use]
    pub fn state(&self) -> ReaderState {
        *self.shared.state.read()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for a running engine.
///
/// # Examples
///
/// ```no_run
/// use cms_core::{EngineConfig, ReparseFlags};
/// use cms_engine::{Engine, HostEvent};
/// use cms_reader::BuildDirParameters;
///
/// # async fn example() -> Result<(), cms_engine::EngineError> {
/// let (handle, mut events) = Engine::new(EngineConfig::default())
///     .with_configuration("Debug", BuildDirParameters::new("/src", "/src/build"))
///     .spawn()?;
///
/// handle.parse(ReparseFlags::URGENT)?;
/// while let Some(event) = events.recv().await {
///     if let HostEvent::DataAvailable(snapshot) = event {
///         println!("{} files", snapshot.file_count());
///         break;
///     }
/// }
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    configurations: ConfigurationSet,
    kit: Vec<ConfigEntry>,
}

impl Engine {
    /// Creates a builder.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            configurations: ConfigurationSet::new(),
            kit: Vec::new(),
        }
    }

    /// Adds a build configuration. The first one added starts active.
    #[must_use]
    pub fn with_configuration(mut self, id: impl Into<String>, params: BuildDirParameters) -> Self {
        self.configurations.add(id, params);
        self
    }

    /// Sets the kit configuration installed at startup.
    #[must_use]
    pub fn with_kit(mut self, entries: Vec<ConfigEntry>) -> Self {
        self.kit = entries;
        self
    }

    /// Starts the engine task. Nothing is parsed until the host asks.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoConfiguration`] if no build configuration
    /// was added.
    pub fn spawn(
        self,
    ) -> Result<(EngineHandle, mpsc::UnboundedReceiver<HostEvent>), EngineError> {
        let params = self
            .configurations
            .active()
            .ok_or(EngineError::NoConfiguration)?
            .params
            .clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            snapshot: RwLock::new(None),
            state: RwLock::new(ReaderState::Idle),
        });

        let driver = Driver::new(self, params, rx, tx.downgrade(), events_tx, Arc::clone(&shared));
        let task = tokio::spawn(driver.run());

        let handle = EngineHandle {
            tx,
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        };
        Ok((handle, events_rx))
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum Next {
    Message(Option<Message>),
    Batch(Option<FileEventBatch>),
    Reply(Option<FileEventBatch>),
}

fn post(tx: &mpsc::WeakUnboundedSender<Message>, message: Message) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(message);
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn next_batch(watcher: &mut Option<DirectoryWatcher>) -> Option<FileEventBatch> {
    match watcher {
        Some(watcher) => watcher.recv().await,
        None => std::future::pending().await,
    }
}

struct Driver {
    config: EngineConfig,
    rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::WeakUnboundedSender<Message>,
    events: mpsc::UnboundedSender<HostEvent>,
    shared: Arc<Shared>,
    orchestrator: Orchestrator,
    configurations: ConfigurationSet,
    params: BuildDirParameters,
    reader: Reader,
    scanner: Scanner,
    watcher: Option<DirectoryWatcher>,
    reply_watcher: Option<DirectoryWatcher>,
    model: ConfigModel,
    applied: Vec<ConfigEntry>,
    initial_passthrough: Vec<String>,
    edits: ManualEdits,
    scanned: Option<Vec<FileNode>>,
    scan_dirs: Vec<Utf8PathBuf>,
    scan_token: Option<CancellationToken>,
    /// Parent of every job token; cancelled and replaced on stop.
    jobs: CancellationToken,
    parse_task: Option<JoinHandle<()>>,
    request: ParseRequest,
    outcome: Option<ParseOutcome>,
    data: Option<ProjectData>,
    diagnostics: Vec<Diagnostic>,
    is_fallback: bool,
    sequence: u64,
}

impl Driver {
    fn new(
        engine: Engine,
        params: BuildDirParameters,
        rx: mpsc::UnboundedReceiver<Message>,
        tx: mpsc::WeakUnboundedSender<Message>,
        events: mpsc::UnboundedSender<HostEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        let Engine {
            config,
            configurations,
            kit,
        } = engine;
        let scanner = Scanner::new(config.scan.clone()).with_build_dir(params.build_dir.clone());
        let mut driver = Self {
            orchestrator: Orchestrator::new(&config.reparse),
            reader: Reader::new(params.clone()),
            scanner,
            config,
            rx,
            tx,
            events,
            shared,
            configurations,
            params,
            watcher: None,
            reply_watcher: None,
            model: ConfigModel::new(),
            applied: Vec::new(),
            initial_passthrough: Vec::new(),
            edits: ManualEdits::new(),
            scanned: None,
            scan_dirs: Vec::new(),
            scan_token: None,
            jobs: CancellationToken::new(),
            parse_task: None,
            request: ParseRequest::default(),
            outcome: None,
            data: None,
            diagnostics: Vec::new(),
            is_fallback: false,
            sequence: 0,
        };
        driver.model.set_from_kit(kit);
        driver.install_initial();
        driver
    }

    async fn run(mut self) {
        info!(
            source_dir = %self.params.source_dir,
            build_dir = %self.params.build_dir,
            "Engine started"
        );
        loop {
            let next = tokio::select! {
                message = self.rx.recv() => Next::Message(message),
                batch = next_batch(&mut self.watcher) => Next::Batch(batch),
                batch = next_batch(&mut self.reply_watcher) => Next::Reply(batch),
            };
            match next {
                Next::Message(Some(message)) => {
                    if !self.on_message(message) {
                        break;
                    }
                }
                Next::Message(None) => break,
                Next::Batch(Some(batch)) => self.on_batch(&batch),
                Next::Batch(None) => {
                    warn!("Directory watcher stopped");
                    self.watcher = None;
                }
                Next::Reply(Some(batch)) => {
                    debug!(events = batch.len(), "Reply directory changed");
                    self.check_dirty();
                }
                Next::Reply(None) => {
                    warn!("Reply watcher stopped");
                    self.reply_watcher = None;
                }
            }
        }
        self.teardown().await;
    }

    fn emit(&self, event: HostEvent) {
        // The host may have dropped its receiver; the engine keeps running.
        let _ = self.events.send(event);
    }

    fn facts(&self) -> CycleFacts {
        CycleFacts {
            cache_exists: self.params.cache_file().is_file(),
            has_delta: !self.model.extra_arguments().is_empty(),
            auto_run: self.params.tool.auto_run,
        }
    }

    fn feed(&mut self, event: EngineEvent) {
        self.orchestrator.set_facts(self.facts());
        for effect in self.orchestrator.handle(event) {
            self.execute(effect);
        }
    }

    fn is_current(&self, version: u64) -> bool {
        self.orchestrator.is_busy() && self.orchestrator.version() == version
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// Returns `false` once the engine has to stop.
    fn on_message(&mut self, message: Message) -> bool {
        match message {
            Message::Command(Command::Shutdown) => return false,
            Message::Command(command) => self.on_command(command),
            Message::ScanDone { version, result } => {
                let ok = result.is_ok();
                if self.is_current(version) {
                    match result {
                        Ok(result) => self.store_scan(result),
                        Err(ScanError::Cancelled) => debug!(version, "Scan cancelled"),
                        Err(e) => warn!(error = %e, "Scan failed"),
                    }
                }
                self.feed(EngineEvent::ScanDone { version, ok });
            }
            Message::ToolDone { version, outcome } => {
                let (ok, fatal) = outcome.as_ref().map_or((false, false), |o| {
                    (o.error.is_none(), o.error.as_ref().is_some_and(ReaderError::is_fatal))
                });
                if self.is_current(version) {
                    self.outcome = outcome;
                }
                self.feed(EngineEvent::ToolDone { version, ok, fatal });
            }
            Message::ThrottleElapsed => self.feed(EngineEvent::ThrottleElapsed(now())),
            Message::DelayElapsed(generation) => self.feed(EngineEvent::DelayElapsed(generation)),
        }
        true
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Parse(flags) => self.feed(EngineEvent::Parse(flags)),
            Command::ResetData => self.reset_data(),
            Command::AddFiles(paths) => {
                self.edits.add_files(paths.into_iter().map(FileNode::classified));
                self.republish();
            }
            Command::EraseFiles(paths) => {
                self.edits.erase_files(&paths);
                self.republish();
            }
            Command::RenameFile { from, to } => {
                self.edits.rename_file(&from, &to);
                self.republish();
            }
            Command::ApplyUserEdit { key, value, reply } => {
                let _ = reply.send(self.model.apply_user_edit(&key, &value));
            }
            Command::ToggleUnset { key, reply } => {
                let _ = reply.send(self.model.toggle_unset(&key));
            }
            Command::ResetUserEdits(scope) => self.model.reset_user_edits(scope),
            Command::Configuration(reply) => {
                let _ = reply.send(self.model.entries().to_vec());
            }
            Command::SetKit(entries) => {
                self.model.set_from_kit(entries);
                self.feed(EngineEvent::EnvironmentChanged);
            }
            Command::SetParameters(params) => {
                self.configurations.update_active(params.clone());
                self.apply_parameters(params);
            }
            Command::ActivateConfiguration { id, reply } => {
                let result = self
                    .configurations
                    .activate(&id)
                    .map(|activation| self.on_activation(activation));
                let _ = reply.send(result);
            }
            Command::EnvironmentChanged => self.feed(EngineEvent::EnvironmentChanged),
            Command::Stop => self.feed(EngineEvent::Stop),
            Command::Shutdown => {}
        }
    }

    fn on_batch(&mut self, batch: &FileEventBatch) {
        let changed = batch
            .directories()
            .into_iter()
            .filter(|dir| self.scanner.listings().needs_rescan_from_disk(dir))
            .count();
        if changed > 0 {
            debug!(directories = changed, "Directory listings changed");
            self.feed(EngineEvent::WatchTriggered(now()));
        }

        if batch.project_file_events().next().is_some()
            && self.params.tool.auto_run
            && !self.orchestrator.retries_disabled()
        {
            debug!("Build description changed");
            self.feed(EngineEvent::Parse(ReparseFlags::DEFAULT));
        }

        self.check_dirty();
    }

    fn check_dirty(&mut self) {
        if self.data.is_some() && !self.orchestrator.is_busy() && self.reader.is_dirty() {
            self.feed(EngineEvent::Dirty);
        }
    }

    // -------------------------------------------------------------------------
    // Effects
    // -------------------------------------------------------------------------

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::State(state) => {
                *self.shared.state.write() = state;
                self.emit(HostEvent::StateChanged(state));
            }
            Effect::ConfigurationStarted => self.emit(HostEvent::ConfigurationStarted),
            Effect::StartScan { version } => self.start_scan(version),
            Effect::StartParse { version, request } => self.start_parse(version, request),
            Effect::ArmDelay { generation, after } => {
                self.arm(Instant::now() + after, Message::DelayElapsed(generation));
            }
            Effect::ArmThrottle(at) => self.arm(Instant::from_std(at), Message::ThrottleElapsed),
            Effect::Extract { version } => self.extract(version),
            Effect::EmitDirty => self.emit(HostEvent::Dirty),
            Effect::Cancel => self.cancel_jobs(),
        }
    }

    fn arm(&self, at: Instant, message: Message) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            post(&tx, message);
        });
    }

    fn start_scan(&mut self, version: u64) {
        if let Some(token) = self.scan_token.take() {
            token.cancel();
        }
        let token = self.jobs.child_token();
        self.scan_token = Some(token.clone());

        let scanner = self.scanner.clone();
        let root = self.params.source_dir.clone();
        let tx = self.tx.clone();
        debug!(version, root = %root, "Starting scan");
        tokio::spawn(async move {
            let result = scanner.scan_async(root, token).await;
            post(&tx, Message::ScanDone { version, result });
        });
    }

    fn start_parse(&mut self, version: u64, request: ParseRequest) {
        let mut params = self.params.clone();
        params.initial_arguments = self
            .initial_passthrough
            .iter()
            .cloned()
            .chain(self.model.initial_arguments())
            .collect();
        params.extra_arguments.extend(self.model.extra_arguments());
        if params.timeout.is_none() {
            params.timeout = self.config.reparse.tool_timeout();
        }
        self.reader.set_parameters(params);
        self.request = request;
        self.outcome = None;
        self.applied = if request.force_extra_config {
            self.model.pending_edits()
        } else {
            Vec::new()
        };

        // The reader holds one result slot; a cancelled parse must finish
        // before the next one starts. Its token exists from now on, so a
        // stop reaches it while it is still queued.
        let previous = self.parse_task.take();
        let reader = self.reader.clone();
        let tx = self.tx.clone();
        let cancel = self.jobs.child_token();
        self.parse_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            reader.parse_with(request, cancel).await;
            post(
                &tx,
                Message::ToolDone {
                    version,
                    outcome: reader.take_result(),
                },
            );
        }));
    }

    fn store_scan(&mut self, result: ScanResult) {
        debug!(
            files = result.files.len(),
            dirs = result.dirs.len(),
            problems = result.errors.len(),
            "Scan finished"
        );
        for error in &result.errors {
            debug!(error = %error, "Scan problem");
        }
        self.scanned = Some(result.files);
        self.scan_dirs = result.dirs;
        self.ensure_watcher();
    }

    fn ensure_watcher(&mut self) {
        if !self.config.watch.enabled {
            return;
        }
        if let Some(watcher) = &self.watcher {
            if let Err(e) = watcher.watch_directories(self.scan_dirs.iter().cloned()) {
                warn!(error = %e, "Failed to update watched directories");
            }
            return;
        }
        let filter = ProjectFilter::new(self.params.source_dir.clone())
            .with_build_dir(self.params.build_dir.clone());
        match DirectoryWatcher::new(
            &self.params.source_dir,
            self.scan_dirs.iter().cloned(),
            &self.config.watch,
            filter,
        ) {
            Ok(watcher) => {
                info!(directories = self.scan_dirs.len(), "Watching project directories");
                self.watcher = Some(watcher);
            }
            Err(e) => warn!(error = %e, "Cannot watch project directories"),
        }
    }

    /// Watches the file API directory so a tool run started elsewhere
    /// marks the model dirty.
    fn ensure_reply_watcher(&mut self) {
        if !self.config.watch.enabled || self.reply_watcher.is_some() {
            return;
        }
        let api_dir = cms_reader::fileapi::api_dir(&self.params.build_dir);
        let config = WatchConfig {
            recursive: true,
            ..self.config.watch
        };
        match DirectoryWatcher::new(&api_dir, Vec::new(), &config, AcceptAllFilter) {
            Ok(watcher) => {
                debug!(dir = %api_dir, "Watching reply directory");
                self.reply_watcher = Some(watcher);
            }
            Err(e) => warn!(error = %e, "Cannot watch reply directory"),
        }
    }

    fn extract(&mut self, version: u64) {
        let Some(outcome) = self.outcome.take() else {
            warn!(version, "Cycle finished without a parse result");
            self.emit(HostEvent::ErrorOccurred {
                message: "the parse produced no result".to_owned(),
                diagnostics: Vec::new(),
            });
            return;
        };

        if let Some(message) = outcome.error_message() {
            self.emit(HostEvent::ErrorOccurred {
                message,
                diagnostics: outcome.diagnostics.clone(),
            });
        }
        if outcome.used_fallback && self.shared.snapshot.read().is_some() {
            debug!(version, "Keeping the last published model");
            return;
        }

        if !outcome.used_fallback {
            self.model.set_from_tool(outcome.data.cache.clone());
            if outcome.error.is_none() && self.request.force_extra_config {
                let applied = std::mem::take(&mut self.applied);
                if self.model.clear_applied_edits(&applied) {
                    debug!(version, "Edits arrived during the run, scheduling another");
                    post(
                        &self.tx,
                        Message::Command(Command::Parse(ReparseFlags::FORCE_EXTRA_CONFIG)),
                    );
                }
            }
        }
        self.data = Some(outcome.data);
        self.diagnostics = outcome.diagnostics;
        self.is_fallback = outcome.used_fallback;
        self.publish();
        if !self.is_fallback {
            self.ensure_reply_watcher();
        }
    }

    fn cancel_jobs(&mut self) {
        self.scan_token = None;
        self.jobs.cancel();
        self.jobs = CancellationToken::new();
        self.reader.stop();
        self.outcome = None;
        self.applied.clear();
    }

    // -------------------------------------------------------------------------
    // Publication
    // -------------------------------------------------------------------------

    fn republish(&mut self) {
        if self.data.is_some() && !self.orchestrator.is_busy() {
            self.publish();
        }
    }

    fn publish(&mut self) {
        let Some(data) = &self.data else {
            return;
        };
        let scanned = self.scanned.as_deref().unwrap_or_default();
        let tool_files = data.tool_files();
        let previous = self.shared.snapshot.read().clone();
        let result = merge(
            &self.params.source_dir,
            &tool_files,
            scanned,
            previous.as_ref().map(|s| &s.tree),
            &self.edits,
        );

        let mut base = tool_files;
        base.extend_from_slice(scanned);
        sort_and_dedup(&mut base);
        self.edits.settle(&base);

        let deployment = DeploymentData::from_project(
            &self.params.source_dir,
            &self.params.build_dir,
            &data.targets,
        )
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read deployment manifest");
            None
        });

        self.sequence += 1;
        let project_name = if data.project_name.is_empty() {
            self.params.project_name.clone()
        } else {
            data.project_name.clone()
        };
        let snapshot = Arc::new(ProjectSnapshot {
            sequence: self.sequence,
            configuration: self
                .configurations
                .active()
                .map(|c| c.id.clone())
                .unwrap_or_default(),
            project_name,
            source_dir: self.params.source_dir.clone(),
            build_dir: self.params.build_dir.clone(),
            tree: result.tree,
            targets: data.targets.clone(),
            project_parts: data.project_parts.clone(),
            cmake_inputs: data.cmake_inputs.clone(),
            configuration_entries: self.model.entries().to_vec(),
            deployment,
            diagnostics: self.diagnostics.clone(),
            is_fallback: self.is_fallback,
            added: result.added,
            removed: result.removed,
        });

        info!(
            sequence = snapshot.sequence,
            files = snapshot.file_count(),
            targets = snapshot.targets.len(),
            fallback = snapshot.is_fallback,
            "Published project model"
        );
        *self.shared.snapshot.write() = Some(Arc::clone(&snapshot));
        self.emit(HostEvent::DataAvailable(snapshot));
    }

    // -------------------------------------------------------------------------
    // Parameters and resets
    // -------------------------------------------------------------------------

    fn install_initial(&mut self) {
        let parsed = entries_from_arguments(&self.params.initial_arguments);
        self.initial_passthrough = parsed.unknown;
        self.model.set_initial(parsed.entries);
    }

    /// Drops everything derived from the build directory. The kit stays.
    fn forget_build_dir(&mut self) {
        self.scanned = None;
        self.scan_dirs.clear();
        self.scanner.listings().clear();
        self.data = None;
        self.outcome = None;
        self.diagnostics.clear();
        self.edits.clear();
        *self.shared.snapshot.write() = None;

        let kit = self.model.kit().to_vec();
        self.model.flush();
        self.model.set_from_kit(kit);
        self.install_initial();
    }

    fn apply_parameters(&mut self, params: BuildDirParameters) {
        let compatible = self.params.is_compatible(&params);
        if compatible {
            self.params = params;
            self.install_initial();
        } else {
            info!(build_dir = %params.build_dir, "Build directory changed");
            self.feed(EngineEvent::Stop);
            self.params = params;
            self.forget_build_dir();
            self.scanner = Scanner::new(self.config.scan.clone())
                .with_build_dir(self.params.build_dir.clone());
            for watcher in [self.watcher.take(), self.reply_watcher.take()].into_iter().flatten() {
                tokio::spawn(async move {
                    if let Err(e) = watcher.shutdown().await {
                        debug!(error = %e, "Watcher shutdown failed");
                    }
                });
            }
        }
        self.reader.set_parameters(self.params.clone());
        self.feed(EngineEvent::ParametersChanged { compatible });
    }

    fn on_activation(&mut self, activation: Activation) {
        let Some(params) = self.configurations.active().map(|c| c.params.clone()) else {
            return;
        };
        match activation {
            Activation::Unchanged => debug!("Configuration already active and current"),
            Activation::Fresh => self.apply_parameters(params),
            Activation::Stale if self.params.is_compatible(&params) => {
                info!(build_dir = %params.build_dir, "Reparsing stale configuration");
                self.feed(EngineEvent::Stop);
                self.params = params;
                self.forget_build_dir();
                self.reader.set_parameters(self.params.clone());
                self.feed(EngineEvent::Parse(ReparseFlags::URGENT | ReparseFlags::FORCE_SCAN));
            }
            // A different build directory is forgotten and reparsed anyway.
            Activation::Stale => self.apply_parameters(params),
        }
    }

    fn reset_data(&mut self) {
        info!(build_dir = %self.params.build_dir, "Resetting project data");
        self.feed(EngineEvent::Stop);
        self.forget_build_dir();
        self.feed(EngineEvent::Parse(
            ReparseFlags::URGENT | ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_SCAN,
        ));
    }

    async fn teardown(mut self) {
        self.jobs.cancel();
        self.reader.stop();
        if let Some(task) = self.parse_task.take() {
            let grace = self.config.reparse.teardown_grace();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(?grace, "Tool still running after grace period, abandoning it");
            }
        }
        for watcher in [self.watcher.take(), self.reply_watcher.take()].into_iter().flatten() {
            if let Err(e) = watcher.shutdown().await {
                debug!(error = %e, "Watcher shutdown failed");
            }
        }
        *self.shared.state.write() = ReaderState::Idle;
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        src: Utf8PathBuf,
        build: Utf8PathBuf,
    }

    fn write(path: &Utf8Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let (src, build) = (root.join("src"), root.join("build"));
        write(&src.join("CMakeLists.txt"), "project(Demo)\nadd_executable(app main.cpp)\n");
        write(&src.join("main.cpp"), "int main() { return 0; }\n");
        write(&src.join("README.md"), "# Demo\n");
        std::fs::create_dir_all(&build).unwrap();
        Fixture {
            _dir: dir,
            src,
            build,
        }
    }

    /// Writes a configured build directory with a current reply.
    fn configure(fx: &Fixture) {
        let (src, build) = (&fx.src, &fx.build);
        write(
            &build.join("CMakeCache.txt"),
            "CMAKE_BUILD_TYPE:STRING=Debug\nCMAKE_HOME_DIRECTORY:INTERNAL=/src\n",
        );
        cms_reader::write_query(build).unwrap();
        let reply = cms_reader::fileapi::reply_dir(build);
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
            r#"{ "entries": [
              { "name": "CMAKE_BUILD_TYPE", "type": "STRING", "value": "Debug", "properties": [] }
            ] }"#,
        );
        write(
            &reply.join("cmakeFiles-v1.json"),
            &format!(
                r#"{{
                  "paths": {{ "source": "{src}", "build": "{build}" }},
                  "inputs": [ {{ "path": "CMakeLists.txt" }} ]
                }}"#
            ),
        );
        write(
            &reply.join("codemodel-v2.json"),
            &format!(
                r#"{{
                  "paths": {{ "source": "{src}", "build": "{build}" }},
                  "configurations": [ {{
                    "name": "Debug",
                    "directories": [ {{ "source": ".", "build": ".", "projectIndex": 0 }} ],
                    "projects": [ {{ "name": "Demo", "directoryIndexes": [0], "targetIndexes": [0] }} ],
                    "targets": [ {{ "name": "app", "id": "app::@1", "directoryIndex": 0, "projectIndex": 0, "jsonFile": "target-app.json" }} ]
                  }} ]
                }}"#
            ),
        );
        write(
            &reply.join("target-app.json"),
            r#"{
              "name": "app", "id": "app::@1", "type": "EXECUTABLE",
              "paths": { "source": ".", "build": "." },
              "artifacts": [ { "path": "app" } ],
              "sources": [ { "path": "main.cpp", "compileGroupIndex": 0 } ],
              "compileGroups": [ { "language": "CXX", "sourceIndexes": [0] } ]
            }"#,
        );
    }

    fn engine_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.watch.enabled = false;
        config
    }

    fn params(fx: &Fixture) -> BuildDirParameters {
        let tool = cms_core::ToolConfig {
            program: fx.src.join("no-such-cmake"),
            ..cms_core::ToolConfig::default()
        };
        BuildDirParameters::new(&fx.src, &fx.build).with_tool(tool)
    }

    async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<HostEvent>, mut matches: F) -> HostEvent
    where
        F: FnMut(&HostEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn next_snapshot(events: &mut mpsc::UnboundedReceiver<HostEvent>) -> Arc<ProjectSnapshot> {
        match wait_for(events, |e| matches!(e, HostEvent::DataAvailable(_))).await {
            HostEvent::DataAvailable(snapshot) => snapshot,
            _ => unreachable!(),
        }
    }

    async fn wait_idle(events: &mut mpsc::UnboundedReceiver<HostEvent>) {
        wait_for(events, |e| matches!(e, HostEvent::StateChanged(ReaderState::Idle))).await;
    }

    /// A tool that logs its arguments, takes a second and then puts the
    /// previous reply back in place.
    #[cfg(unix)]
    fn fake_tool(fx: &Fixture) -> (BuildDirParameters, Utf8PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let root = fx.src.parent().unwrap();
        let (script, log) = (root.join("fake-cmake"), root.join("runs.log"));
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{log}'\nsleep 1\ncp -R .cmake/api/v1/reply.prev .cmake/api/v1/reply\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let tool = cms_core::ToolConfig {
            program: script,
            ..cms_core::ToolConfig::default()
        };
        (BuildDirParameters::new(&fx.src, &fx.build).with_tool(tool), log)
    }

    fn runs(log: &Utf8Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[tokio::test]
    async fn test_publishes_reply_merged_with_scan() {
        let fx = fixture();
        configure(&fx);
        let (handle, mut events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();

        handle.parse(ReparseFlags::URGENT).unwrap();
        let snapshot = next_snapshot(&mut events).await;
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.configuration, "Debug");
        assert_eq!(snapshot.project_name, "Demo");
        assert!(!snapshot.is_fallback);
        assert!(snapshot.target("app").is_some());
        assert!(snapshot.tree.contains(&fx.src.join("main.cpp")));
        assert!(snapshot.tree.contains(&fx.src.join("CMakeLists.txt")));
        // Only the scanner knows about the readme.
        assert!(snapshot.tree.contains(&fx.src.join("README.md")));
        assert!(snapshot.tree.files().iter().all(|f| !f.path.starts_with(&fx.build)));

        wait_idle(&mut events).await;
        assert_eq!(handle.state(), ReaderState::Idle);
        assert_eq!(handle.snapshot().unwrap().sequence, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_tool_publishes_fallback_once() {
        let fx = fixture();
        let (handle, mut events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();

        handle.parse(ReparseFlags::URGENT).unwrap();
        let error = wait_for(&mut events, |e| matches!(e, HostEvent::ErrorOccurred { .. })).await;
        assert!(matches!(error, HostEvent::ErrorOccurred { ref message, .. } if !message.is_empty()));
        let snapshot = next_snapshot(&mut events).await;
        assert!(snapshot.is_fallback);
        assert!(snapshot.tree.contains(&fx.src.join("CMakeLists.txt")));
        wait_for(&mut events, |e| matches!(e, HostEvent::StateChanged(ReaderState::Error))).await;
        wait_idle(&mut events).await;

        // The second failure keeps the first model.
        handle.parse(ReparseFlags::URGENT).unwrap();
        wait_for(&mut events, |e| matches!(e, HostEvent::ErrorOccurred { .. })).await;
        wait_idle(&mut events).await;
        assert_eq!(handle.snapshot().unwrap().sequence, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_edits_republish() {
        let fx = fixture();
        configure(&fx);
        let (handle, mut events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        next_snapshot(&mut events).await;
        wait_idle(&mut events).await;

        let notes = fx.src.join("notes.txt");
        handle.add_files([notes.clone()]).unwrap();
        let snapshot = next_snapshot(&mut events).await;
        assert_eq!(snapshot.sequence, 2);
        assert!(snapshot.tree.contains(&notes));
        assert_eq!(snapshot.added, [notes.clone()]);

        handle.erase_files([fx.src.join("README.md")]).unwrap();
        let snapshot = next_snapshot(&mut events).await;
        assert!(!snapshot.tree.contains(&fx.src.join("README.md")));
        assert!(snapshot.tree.contains(&notes));

        handle.rename_file(notes.clone(), fx.src.join("notes.md")).unwrap();
        let snapshot = next_snapshot(&mut events).await;
        assert!(!snapshot.tree.contains(&notes));
        assert!(snapshot.tree.contains(&fx.src.join("notes.md")));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_user_edits_go_through_the_model() {
        let fx = fixture();
        configure(&fx);
        let (handle, mut events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        next_snapshot(&mut events).await;
        wait_idle(&mut events).await;

        handle.apply_user_edit("CMAKE_BUILD_TYPE", "Release").await.unwrap();
        handle.apply_user_edit("WITH_DOCS", "ON").await.unwrap();
        assert!(handle.toggle_unset("WITH_DOCS").await.unwrap());
        let err = handle.toggle_unset("NO_SUCH_KEY").await.unwrap_err();
        assert!(matches!(err, EngineError::Config(EntryError::UnknownKey(ref key)) if key == "NO_SUCH_KEY"));

        let entries = handle.configuration().await.unwrap();
        let build_type = entries.iter().find(|e| e.key() == "CMAKE_BUILD_TYPE").unwrap();
        assert!(build_type.is_user_changed);
        assert_eq!(build_type.new_value, "Release");
        let docs = entries.iter().find(|e| e.key() == "WITH_DOCS").unwrap();
        assert!(docs.is_user_new);
        assert!(docs.entry.is_unset);

        handle.reset_user_edits(Scope::All).unwrap();
        let entries = handle.configuration().await.unwrap();
        assert!(entries.iter().all(|e| !e.has_change()));
        handle.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_edits_made_during_a_run_survive_it() {
        let fx = fixture();
        configure(&fx);
        let (params, log) = fake_tool(&fx);
        let mut config = engine_config();
        config.reparse.reparse_delay_ms = 50;
        let (handle, mut events) = Engine::new(config)
            .with_configuration("Debug", params)
            .spawn()
            .unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        next_snapshot(&mut events).await;
        wait_idle(&mut events).await;

        handle.apply_user_edit("CMAKE_BUILD_TYPE", "Release").await.unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        wait_for(&mut events, |e| matches!(e, HostEvent::ConfigurationStarted)).await;
        handle.apply_user_edit("WITH_DOCS", "ON").await.unwrap();

        let snapshot = next_snapshot(&mut events).await;
        let entry = |key: &str| {
            snapshot
                .configuration_entries
                .iter()
                .find(|e| e.key() == key)
                .cloned()
                .unwrap()
        };
        assert!(!entry("CMAKE_BUILD_TYPE").has_change());
        let docs = entry("WITH_DOCS");
        assert!(docs.is_user_new);
        assert_eq!(docs.current_value(), "ON");

        // The edit that missed the first run goes out with the next one.
        wait_for(&mut events, |e| matches!(e, HostEvent::ConfigurationStarted)).await;
        let snapshot = next_snapshot(&mut events).await;
        assert!(snapshot.configuration_entries.iter().all(|e| !e.has_change()));
        let runs = runs(&log);
        assert!(runs.iter().any(|r| r.contains("=Release") && !r.contains("WITH_DOCS")));
        assert!(runs.last().unwrap().contains("-DWITH_DOCS"));
        handle.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_cancels_queued_parse() {
        let fx = fixture();
        configure(&fx);
        let (params, log) = fake_tool(&fx);
        let (handle, _events) = Engine::new(engine_config())
            .with_configuration("Debug", params)
            .spawn()
            .unwrap();
        let flags = ReparseFlags::URGENT | ReparseFlags::FORCE_TOOL_RUN;

        handle.parse(flags).unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while runs(&log).is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        handle.stop().unwrap();
        handle.parse(flags).unwrap();
        handle.stop().unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runs(&log).len(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_reply_marks_dirty() {
        let fx = fixture();
        configure(&fx);
        let mut config = EngineConfig::default();
        config.watch.debounce_ms = 50;
        let (handle, mut events) = Engine::new(config)
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        next_snapshot(&mut events).await;
        wait_idle(&mut events).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Another tool run leaves a newer index behind.
        let reply = cms_reader::fileapi::reply_dir(&fx.build);
        let index = reply.join("index-2030-01-01T00-00-00-0000.json");
        std::fs::copy(reply.join("index-2024-01-01T00-00-00-0000.json"), &index).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&index)
            .unwrap()
            .set_modified(std::time::SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        wait_for(&mut events, |e| matches!(e, HostEvent::Dirty)).await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_activation_reparses_only_stale_configurations() {
        let fx = fixture();
        configure(&fx);
        let (handle, mut events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .with_configuration("Release", params(&fx))
            .spawn()
            .unwrap();
        handle.parse(ReparseFlags::URGENT).unwrap();
        next_snapshot(&mut events).await;
        wait_idle(&mut events).await;

        handle.activate_configuration("Debug").await.unwrap();
        let started = tokio::time::timeout(
            Duration::from_millis(300),
            wait_for(&mut events, |e| matches!(e, HostEvent::ConfigurationStarted)),
        )
        .await;
        assert!(started.is_err());
        assert_eq!(handle.snapshot().unwrap().sequence, 1);

        handle.activate_configuration("Release").await.unwrap();
        handle.activate_configuration("Debug").await.unwrap();
        wait_for(&mut events, |e| matches!(e, HostEvent::ConfigurationStarted)).await;
        let snapshot = next_snapshot(&mut events).await;
        assert_eq!(snapshot.configuration, "Debug");
        assert!(!snapshot.is_fallback);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_configuration_is_rejected() {
        let fx = fixture();
        let (handle, _events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();
        let err = handle.activate_configuration("Release").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownConfiguration(ref id) if id == "Release"));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_without_configuration() {
        let err = Engine::new(engine_config()).spawn().unwrap_err();
        assert!(matches!(err, EngineError::NoConfiguration));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let fx = fixture();
        let (handle, _events) = Engine::new(engine_config())
            .with_configuration("Debug", params(&fx))
            .spawn()
            .unwrap();
        handle.shutdown().await.unwrap();
        handle.shutdown().await.unwrap();
        assert!(matches!(handle.parse(ReparseFlags::URGENT), Err(EngineError::ChannelClosed)));
    }
}
