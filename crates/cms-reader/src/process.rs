//! Running the tool as a subprocess.
//!
//! The tool runs in the build directory with a sanitized environment. Its
//! output is read line by line: standard output is logged, standard error
//! feeds the [`DiagnosticsParser`]. A run is bounded by the configured
//! timeout and can be cancelled; both kill the child.

use std::process::Stdio;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::args::join_args;
use crate::diagnostics::DiagnosticsParser;
use crate::error::ReaderError;
use crate::params::BuildDirParameters;

/// Host variables passed through to the tool.
const PASSTHROUGH_ENV: [&str; 16] = [
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "TMPDIR",
    "TEMP",
    "TMP",
    "SYSTEMROOT",
    "CC",
    "CXX",
    "CFLAGS",
    "CXXFLAGS",
    "LDFLAGS",
    "PKG_CONFIG_PATH",
    "CMAKE_PREFIX_PATH",
];

/// Variables forced on every run so output is parseable and builds are
/// local.
const FORCED_ENV: [(&str, &str); 3] = [("LC_ALL", "C"), ("LANG", "C"), ("ICECC", "no")];

/// A fully assembled tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// The executable.
    pub program: Utf8PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub work_dir: Utf8PathBuf,
    /// Environment, applied to an empty base.
    pub env: Vec<(String, String)>,
    /// Upper bound for the run.
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    fn base(params: &BuildDirParameters, args: Vec<String>) -> Self {
        let mut env: Vec<(String, String)> = PASSTHROUGH_ENV
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_owned(), v)))
            .collect();
        let mut custom: Vec<_> = params.tool.environment.iter().collect();
        custom.sort();
        env.extend(custom.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(FORCED_ENV.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())));

        Self {
            program: params.tool.program.clone(),
            args,
            work_dir: params.build_dir.clone(),
            env,
            timeout: params.timeout,
        }
    }

    /// A configure run: `[generator args] [args] <source dir>`.
    #[must_use]
    pub fn configure(params: &BuildDirParameters, args: Vec<String>) -> Self {
        let mut all = params.tool.generator_arguments();
        all.extend(args);
        all.push(params.source_dir.to_string());
        Self::base(params, all)
    }

    /// A server-mode session over standard input and output.
    #[must_use]
    pub fn server(params: &BuildDirParameters) -> Self {
        let args = ["-E", "server", "--experimental"].map(str::to_owned).to_vec();
        Self {
            timeout: None,
            ..Self::base(params, args)
        }
    }

    /// Returns the command line for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.to_string()];
        parts.extend(self.args.iter().cloned());
        join_args(&parts)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.program.as_std_path());
        command
            .args(&self.args)
            .current_dir(self.work_dir.as_std_path())
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Spawns the tool with the given standard input.
    pub fn spawn(&self, stdin: Stdio) -> Result<Child, ReaderError> {
        if let Err(e) = std::fs::create_dir_all(&self.work_dir) {
            return Err(ReaderError::io(&self.work_dir, e));
        }
        tracing::info!(
            command = %self.command_line(),
            dir = %self.work_dir,
            "Running tool"
        );
        self.command().stdin(stdin).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReaderError::tool_not_found(&self.program, e)
            } else {
                ReaderError::io(&self.program, e)
            }
        })
    }
}

pub(crate) async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill tool process");
    }
}

fn exit_result(status: std::process::ExitStatus) -> Result<(), ReaderError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ReaderError::exited(code)),
        None => Err(ReaderError::ToolCrashed),
    }
}

/// Runs `command` to completion.
///
/// Standard error lines are fed to `parser`; the parser is flushed when the
/// stream ends.
pub async fn run_tool(
    command: &ToolCommand,
    parser: &mut DiagnosticsParser,
    cancel: &CancellationToken,
) -> Result<(), ReaderError> {
    let mut child = command.spawn(Stdio::null())?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

    let deadline = async {
        match command.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            line = async { stdout_lines.as_mut()?.next_line().await.ok().flatten() }, if stdout_lines.is_some() => {
                match line {
                    Some(line) => tracing::info!("{line}"),
                    None => stdout_lines = None,
                }
            }
            line = async { stderr_lines.as_mut()?.next_line().await.ok().flatten() }, if stderr_lines.is_some() => {
                match line {
                    Some(line) => {
                        tracing::debug!(line = %line, "Tool stderr");
                        parser.push_line(&line);
                    }
                    None => stderr_lines = None,
                }
            }
            status = child.wait(), if stdout_lines.is_none() && stderr_lines.is_none() => {
                parser.flush();
                let status = status.map_err(|e| ReaderError::io(&command.program, e))?;
                tracing::debug!(status = %status, "Tool finished");
                return exit_result(status);
            }
            () = cancel.cancelled() => {
                kill(&mut child).await;
                parser.flush();
                return Err(ReaderError::Cancelled);
            }
            () = &mut deadline => {
                kill(&mut child).await;
                parser.flush();
                return Err(ReaderError::Timeout(command.timeout.unwrap_or_default()));
            }
        }
    }
}
