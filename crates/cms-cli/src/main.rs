//! CLI entry point for cmake-sync.
//!
//! This binary drives the synchronization engine from the command line:
//! one-shot parses of a build directory, filesystem scans, cache inspection,
//! and a long-running watch mode that logs every model update.
//!
//! # Usage
//!
//! ```bash
//! cmake-sync [OPTIONS] <COMMAND>
//!
//! # Read the build directory and print targets and files
//! cmake-sync --source ~/src/demo --build ~/src/demo/build parse
//!
//! # Reconfigure with a changed cache variable
//! cmake-sync -s ~/src/demo parse -D CMAKE_BUILD_TYPE=Release
//!
//! # Keep the model in sync until Ctrl-C
//! cmake-sync -s ~/src/demo watch
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use cms_config::{ConfigEntry, ConfigModel, entries_from_arguments, entries_from_cache_file};
use cms_core::{EngineConfig, FileNode, ReaderState, ReparseFlags};
use cms_engine::{Engine, HostEvent, ProjectSnapshot};
use cms_reader::{BuildDirParameters, Diagnostic, ToolchainOverride};
use cms_scanner::{ScanResult, Scanner, StatsSnapshot};
use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Keeps a project model in sync with a CMake build directory.
///
/// Runs CMake when its reply is stale, reads the file-based API reply and
/// merges it with a scan of the source tree.
#[derive(Parser)]
#[command(name = "cmake-sync", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Top-level source directory.
    ///
    /// Defaults to the current directory.
    #[arg(short, long, global = true, env = "CMAKE_SYNC_SOURCE")]
    source: Option<Utf8PathBuf>,

    /// Build directory.
    ///
    /// Defaults to `<source>/build`.
    #[arg(short, long, global = true, env = "CMAKE_SYNC_BUILD")]
    build: Option<Utf8PathBuf>,

    /// CMake executable (overrides the configuration file).
    #[arg(long, global = true, env = "CMAKE_SYNC_CMAKE")]
    cmake: Option<Utf8PathBuf>,

    /// Build type: read from multi-config generators and passed as
    /// `CMAKE_BUILD_TYPE` on initial configurations.
    #[arg(long, global = true, env = "CMAKE_SYNC_BUILD_TYPE")]
    build_type: Option<String>,

    /// Toolchain file passed on initial configurations.
    #[arg(long, global = true, env = "CMAKE_SYNC_TOOLCHAIN_FILE")]
    toolchain_file: Option<Utf8PathBuf>,

    /// Engine configuration file (JSON).
    #[arg(long, global = true, env = "CMAKE_SYNC_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run one reparse cycle and print the resulting model.
    Parse {
        /// Run CMake even if the reply is current.
        #[arg(long)]
        force: bool,

        /// Configure from scratch with the initial arguments.
        #[arg(long)]
        initial: bool,

        /// Cache definitions to pass (`VAR[:TYPE]=VALUE`).
        #[arg(short = 'D', value_name = "VAR[:TYPE]=VALUE")]
        define: Vec<String>,
    },

    /// Scan the source tree without running CMake.
    Scan {
        /// Show the file list.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Print the cache of the build directory, or the arguments a set of
    /// edits would pass to CMake.
    Cache {
        /// Include internal and static entries.
        #[arg(short, long)]
        all: bool,

        /// Cache definitions to apply (`VAR[:TYPE]=VALUE`).
        #[arg(short = 'D', value_name = "VAR[:TYPE]=VALUE")]
        define: Vec<String>,

        /// Cache variables to remove.
        #[arg(short = 'U', value_name = "VAR")]
        unset: Vec<String>,
    },

    /// Keep the model in sync with the filesystem until interrupted.
    Watch {
        /// Disable directory watching (parse once, then wait).
        #[arg(long)]
        no_watch: bool,
    },
}

/// Resolved command-line settings shared by all subcommands.
struct Settings {
    config: EngineConfig,
    params: BuildDirParameters,
}

impl Settings {
    fn configuration_id(&self) -> String {
        self.params
            .build_type
            .clone()
            .unwrap_or_else(|| "default".to_owned())
    }

    fn engine(&self, config: EngineConfig, params: BuildDirParameters) -> Engine {
        Engine::new(config).with_configuration(self.configuration_id(), params)
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn,globset=warn,ignore=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Makes `path` absolute against the working directory.
fn absolute(path: &Utf8Path) -> color_eyre::Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(cms_reader::extract::normalize(path));
    }
    let cwd = Utf8PathBuf::try_from(std::env::current_dir()?)?;
    Ok(cms_reader::extract::normalize(&cwd.join(path)))
}

/// Builds [`Settings`] from CLI arguments.
///
/// # Errors
///
/// Returns an error if the source directory doesn't exist or the
/// configuration file can't be loaded.
fn build_settings(cli: &Cli) -> color_eyre::Result<Settings> {
    let source = absolute(cli.source.as_deref().unwrap_or(Utf8Path::new(".")))?;

    if !source.exists() {
        return Err(eyre!("Source directory does not exist: {}", source));
    }
    if !source.is_dir() {
        return Err(eyre!("Source path is not a directory: {}", source));
    }
    if !source.join("CMakeLists.txt").is_file() {
        warn!(source = %source, "No CMakeLists.txt in source directory");
    }

    let build = match &cli.build {
        Some(build) => absolute(build)?,
        None => source.join("build"),
    };

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(cmake) = &cli.cmake {
        config.tool.program.clone_from(cmake);
    }
    config.validate()?;

    let mut params = BuildDirParameters::new(&source, &build)
        .with_tool(config.tool.clone())
        .with_timeout(config.reparse.tool_timeout());
    if let Some(build_type) = &cli.build_type {
        params = params.with_build_type(build_type.clone());
    }
    if let Some(toolchain) = &cli.toolchain_file {
        params = params.with_toolchain(ToolchainOverride::File(absolute(toolchain)?));
    }

    debug!(source = %source, build = %build, tool = %config.tool.program, "Resolved settings");
    Ok(Settings { config, params })
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs one reparse cycle and prints the published model.
///
/// # Errors
///
/// Returns an error if the cycle fails; the fallback model is still
/// printed.
async fn run_parse(
    settings: &Settings,
    force: bool,
    initial: bool,
    define: &[String],
    json: bool,
) -> color_eyre::Result<()> {
    let mut params = settings.params.clone();
    let mut flags = ReparseFlags::URGENT;
    if force {
        flags |= ReparseFlags::FORCE_TOOL_RUN;
    }
    if initial {
        flags |= ReparseFlags::FORCE_INITIAL_CONFIG;
    }

    let definitions = define.iter().map(|d| format!("-D{d}"));
    if initial {
        params.initial_arguments.extend(definitions);
    } else if !define.is_empty() {
        params.extra_arguments.extend(definitions);
        flags |= ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_EXTRA_CONFIG;
    }

    let mut config = settings.config.clone();
    config.watch.enabled = false;
    info!(build_dir = %params.build_dir, flags = %flags, "Parsing build directory");

    let (handle, mut events) = settings.engine(config, params).spawn()?;
    handle.parse(flags)?;

    let mut snapshot = None;
    let mut errors = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::DataAvailable(published) => snapshot = Some(published),
            HostEvent::ErrorOccurred { message, .. } => errors.push(message),
            HostEvent::StateChanged(ReaderState::Idle) => break,
            HostEvent::StateChanged(state) => debug!(state = %state, "State changed"),
            HostEvent::ConfigurationStarted | HostEvent::Dirty => {}
        }
    }
    handle.shutdown().await?;

    if let Some(snapshot) = &snapshot {
        if json {
            print_json(snapshot.as_ref())?;
        } else {
            print_snapshot(snapshot);
        }
    }

    match errors.first() {
        None if snapshot.is_some() => Ok(()),
        None => Err(eyre!("Parse produced no project model")),
        Some(first) => Err(eyre!("Parse failed: {}", first)),
    }
}

/// Runs a one-shot scan with summary output.
///
/// # Errors
///
/// Returns an error if scanning fails.
fn run_scan(settings: &Settings, detailed: bool, json: bool) -> color_eyre::Result<()> {
    info!(source = %settings.params.source_dir, "Starting scan");

    let scanner = Scanner::new(settings.config.scan.clone())
        .with_build_dir(settings.params.build_dir.clone());
    let result = scanner.scan(&settings.params.source_dir, &CancellationToken::new())?;

    if json {
        #[derive(serde::Serialize)]
        struct Report<'a> {
            stats: &'a StatsSnapshot,
            files: &'a [FileNode],
            dirs: &'a [Utf8PathBuf],
        }
        return print_json(&Report {
            stats: &result.stats,
            files: &result.files,
            dirs: &result.dirs,
        });
    }

    print_scan_summary(&result);
    if detailed {
        print_file_list(&result.files);
    }

    if !result.errors.is_empty() {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        writeln!(handle)?;
        writeln!(handle, "Errors ({}):", result.errors.len())?;
        for error in &result.errors {
            writeln!(handle, "  {error}")?;
        }
    }

    Ok(())
}

/// Prints the cache, or the argument delta a set of edits produces.
///
/// # Errors
///
/// Returns an error if `CMakeCache.txt` can't be read.
fn run_cache(
    settings: &Settings,
    all: bool,
    define: &[String],
    unset: &[String],
    json: bool,
) -> color_eyre::Result<()> {
    let cache_file = settings.params.cache_file();
    let entries = entries_from_cache_file(&cache_file)?;

    if define.is_empty() && unset.is_empty() {
        let visible: Vec<&ConfigEntry> = entries
            .iter()
            .filter(|e| all || !e.entry_type.is_hidden())
            .collect();
        if json {
            return print_json(&visible);
        }
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for entry in visible {
            if let Some(definition) = entry.to_definition() {
                writeln!(handle, "{definition}")?;
            }
        }
        return Ok(());
    }

    let arguments: Vec<String> = define
        .iter()
        .map(|d| format!("-D{d}"))
        .chain(unset.iter().map(|u| format!("-U{u}")))
        .collect();
    let mut model = ConfigModel::new();
    model.set_from_tool(entries);
    model.set_batch_edit(entries_from_arguments(&arguments).entries);

    let delta = model.extra_arguments();
    if json {
        return print_json(&delta);
    }
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for argument in &delta {
        writeln!(handle, "{argument}")?;
    }
    Ok(())
}

/// Runs the engine with directory watching until interrupted.
///
/// # Errors
///
/// Returns an error if the engine can't be started.
async fn run_watch(settings: &Settings, no_watch: bool, json: bool) -> color_eyre::Result<()> {
    info!(source = %settings.params.source_dir, watch = !no_watch, "Starting engine");

    let mut config = settings.config.clone();
    config.watch.enabled = !no_watch;
    let (handle, mut events) = settings.engine(config, settings.params.clone()).spawn()?;
    handle.parse(ReparseFlags::URGENT)?;

    let log_events = async {
        while let Some(event) = events.recv().await {
            log_event(&event, json);
        }
    };

    // Handle SIGTERM for graceful shutdown on Unix
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            () = log_events => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            () = log_events => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Logs one host event.
fn log_event(event: &HostEvent, json: bool) {
    match event {
        HostEvent::ConfigurationStarted => info!("Configuration started"),
        HostEvent::DataAvailable(snapshot) => {
            info!(
                sequence = snapshot.sequence,
                files = snapshot.file_count(),
                targets = snapshot.targets.len(),
                added = snapshot.added.len(),
                removed = snapshot.removed.len(),
                fallback = snapshot.is_fallback,
                "Project model updated"
            );
            if json {
                if let Err(e) = print_json_line(snapshot.as_ref()) {
                    warn!(error = %e, "Failed to write snapshot");
                }
            }
        }
        HostEvent::ErrorOccurred {
            message,
            diagnostics,
        } => {
            warn!(diagnostics = diagnostics.len(), "{message}");
            for diagnostic in diagnostics {
                warn!("{diagnostic}");
            }
        }
        HostEvent::Dirty => info!("Build directory changed outside the engine"),
        HostEvent::StateChanged(state) => debug!(state = %state, "State changed"),
    }
}

/// Prints a human-readable summary of a published model.
fn print_snapshot(snapshot: &ProjectSnapshot) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    let _ = writeln!(handle);
    let _ = writeln!(handle, "Project: {}", snapshot.project_name);
    let _ = writeln!(handle, "  Source:  {}", snapshot.source_dir);
    let _ = writeln!(handle, "  Build:   {}", snapshot.build_dir);
    if snapshot.is_fallback {
        let _ = writeln!(handle, "  (minimal model, the build directory could not be read)");
    }

    let targets: Vec<_> = snapshot.targets.iter().filter(|t| !t.is_special()).collect();
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Targets ({}):", targets.len());
    for target in targets {
        let artifact = target
            .artifact_path
            .as_ref()
            .map_or_else(String::new, |p| format!("  {p}"));
        let _ = writeln!(
            handle,
            "  {:<24} {:<16}{}",
            target.title,
            target.target_type.label(),
            artifact
        );
    }

    let files = snapshot.tree.files();
    let generated = files.iter().filter(|f| f.is_generated).count();
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Files: {} ({} generated)", files.len(), generated);
    let _ = writeln!(handle, "Build inputs: {}", snapshot.cmake_inputs.len());

    if let Some(deployment) = &snapshot.deployment {
        let _ = writeln!(handle, "Deployables: {}", deployment.files.len());
    }

    print_diagnostics(&mut handle, &snapshot.diagnostics);
}

fn print_diagnostics(handle: &mut impl Write, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Diagnostics ({}):", diagnostics.len());
    for diagnostic in diagnostics {
        let _ = writeln!(handle, "  {diagnostic}");
    }
}

/// Prints a summary of scan statistics.
fn print_scan_summary(result: &ScanResult) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let stats = &result.stats;

    let _ = writeln!(handle);
    let _ = writeln!(handle, "Scan Summary");
    let _ = writeln!(handle, "============");
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Files kept:        {}", stats.files);
    let _ = writeln!(handle, "Directories:       {}", stats.dirs);
    let _ = writeln!(handle, "  Excluded:        {}", stats.excluded);
    let _ = writeln!(handle, "  Binary:          {}", stats.binary);
    let _ = writeln!(handle, "  Probe cache hits:{:>5}", stats.probe_hits);
    let _ = writeln!(handle, "  Errors:          {}", stats.errors);
}

/// Prints the scanned files.
fn print_file_list(files: &[FileNode]) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    let _ = writeln!(handle);
    let _ = writeln!(handle, "Files ({}):", files.len());
    for file in files {
        let marker = if file.is_generated { " (generated)" } else { "" };
        let _ = writeln!(handle, "  {}{marker}", file.path);
    }
}

/// Writes `value` as pretty JSON to stdout.
fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> color_eyre::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| eyre!("Failed to serialize JSON: {}", e))?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{text}")?;
    Ok(())
}

/// Writes `value` as one line of JSON to stdout.
fn print_json_line<T: serde::Serialize + ?Sized>(value: &T) -> color_eyre::Result<()> {
    let text = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize JSON: {}", e))?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{text}")?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Resolve paths and configuration
    let settings = build_settings(&cli)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Parse {
            force,
            initial,
            define,
        } => run_parse(&settings, *force, *initial, define, cli.json).await,
        Commands::Scan { detailed } => run_scan(&settings, *detailed, cli.json),
        Commands::Cache { all, define, unset } => {
            run_cache(&settings, *all, define, unset, cli.json)
        }
        Commands::Watch { no_watch } => run_watch(&settings, *no_watch, cli.json).await,
    }
}
