//! Whether a parse must run the tool or can re-read the last reply.

use std::time::SystemTime;

use camino::Utf8Path;
use serde::Serialize;

use crate::fileapi::{find_latest_index, modified, query_file, reply_dir};

/// Why the tool has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// The caller forced a run.
    Forced,
    /// There are configuration arguments to pass.
    Arguments,
    /// No reply exists yet.
    NoReply,
    /// A build-description file changed after the last reply.
    InputsChanged,
    /// The query changed after the last reply.
    QueryChanged,
}

/// Outcome of [`RunDecision::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDecision {
    /// Run the tool.
    Run(RunReason),
    /// The last reply is current.
    ReadReply,
}

/// Timestamps and flags feeding the decision.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// A force flag was set.
    pub force: bool,
    /// The assembled argument list is non-empty.
    pub has_arguments: bool,
    /// The tool may be re-run automatically.
    pub auto_run: bool,
    /// Modification time of the newest reply index.
    pub reply: Option<SystemTime>,
    /// Newest modification time among the tracked input files.
    pub newest_input: Option<SystemTime>,
    /// Modification time of the query file.
    pub query: Option<SystemTime>,
}

impl RunInputs {
    /// Collects the timestamps of `build_dir` and `tracked_inputs`.
    pub fn from_disk<'a>(
        build_dir: &Utf8Path,
        tracked_inputs: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Self {
        Self {
            reply: find_latest_index(&reply_dir(build_dir)).and_then(|p| modified(&p)),
            newest_input: tracked_inputs.into_iter().filter_map(modified).max(),
            query: modified(&query_file(build_dir)),
            ..Self::default()
        }
    }
}

impl RunDecision {
    /// Decides whether to run the tool.
    ///
    /// # Examples
    ///
    /// ```
    /// use cms_reader::{RunDecision, RunInputs, RunReason};
    ///
    /// let inputs = RunInputs::default();
    /// assert_eq!(RunDecision::evaluate(&inputs), RunDecision::Run(RunReason::NoReply));
    /// ```
    #[must_use]
    pub fn evaluate(inputs: &RunInputs) -> Self {
        if inputs.force {
            return Self::Run(RunReason::Forced);
        }
        if inputs.has_arguments {
            return Self::Run(RunReason::Arguments);
        }
        let Some(reply) = inputs.reply else {
            return Self::Run(RunReason::NoReply);
        };
        if inputs.auto_run && inputs.newest_input.is_some_and(|t| t > reply) {
            return Self::Run(RunReason::InputsChanged);
        }
        if inputs.query.is_some_and(|t| t > reply) {
            return Self::Run(RunReason::QueryChanged);
        }
        Self::ReadReply
    }

    /// Returns `true` if the tool has to run.
    #[must_use]
    pub const fn must_run(self) -> bool {
        matches!(self, Self::Run(_))
    }
}
