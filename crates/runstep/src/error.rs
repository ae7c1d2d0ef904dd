//! Error taxonomy for run-step execution.

use crate::resolver::ResolveError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit status shells use when the command text cannot be parsed.
pub const EXIT_SYNTAX_ERROR: i32 = 2;
/// Exit status shells use when a command cannot be found or executed.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// How a run-step process ended unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited with a non-zero status.
    Code(i32),
    /// The process was terminated by a signal.
    Signal(i32),
    /// The shell could not be started at all.
    LaunchFailed,
}

impl ExitReason {
    /// Exit code as the caller should see it; `None` for signals.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            Self::Signal(_) => None,
            Self::LaunchFailed => Some(EXIT_COMMAND_NOT_FOUND),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self.exit_code() {
            None => FailureKind::Signaled,
            Some(EXIT_COMMAND_NOT_FOUND) => FailureKind::LaunchFailure,
            Some(EXIT_SYNTAX_ERROR) => FailureKind::SyntaxFailure,
            Some(_) => FailureKind::NonZeroExit,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::LaunchFailed => write!(f, "exit status {EXIT_COMMAND_NOT_FOUND}"),
            Self::Signal(signal) => write!(f, "signal: {signal}"),
        }
    }
}

/// Classification of execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Command or shell could not be found/started (127).
    LaunchFailure,
    /// Shell rejected the command text (2).
    SyntaxFailure,
    /// Command ran and returned another non-zero status.
    NonZeroExit,
    /// Command was killed by a signal.
    Signaled,
}

#[derive(Debug, Error)]
pub enum RunStepError {
    /// The tool distribution/version could not be made available.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{status}: running \"{command}\" in {}: {output}", .dir.display())]
    Exec {
        status: ExitReason,
        command: String,
        dir: PathBuf,
        /// Output captured before the failure; for launch failures, the OS error.
        output: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunStepError>;

impl RunStepError {
    pub(crate) fn exec(
        status: ExitReason,
        command: &str,
        dir: &Path,
        output: impl Into<String>,
    ) -> Self {
        Self::Exec {
            status,
            command: command.to_string(),
            dir: dir.to_path_buf(),
            output: output.into(),
        }
    }

    /// Exit code of a failed command, if the failure came from execution.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exec { status, .. } => status.exit_code(),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Exec { status, .. } => Some(status.kind()),
            _ => None,
        }
    }
}
