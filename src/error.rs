//! Error taxonomy for benchmark orchestration.
//!
//! Every variant except [`Error::PreconditionMissing`] and [`Error::Interrupted`] is scoped to a single matrix cell
//! and ends up recorded as a [`crate::results::Failure`] rather than propagated.

use std::{io, path::PathBuf, time::Duration};

use crate::runners::BackendId;

/// Convenience alias for results carrying an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while discovering, invoking, or parsing a benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not installed.
    #[error("{tool} not found ({hint})")]
    PreconditionMissing {
        /// Name of the missing tool.
        tool: String,
        /// How to get the tool.
        hint: String,
    },

    /// The backend executable could not be resolved from any candidate location.
    #[error("{backend} executable not found ({hint})")]
    BackendUnavailable {
        /// The backend that could not be resolved.
        backend: BackendId,
        /// How to get the backend built.
        hint: String,
    },

    /// The timing tool exited unsuccessfully.
    #[error("timing tool exited with {}: {stderr_tail}", describe_exit(.exit_code))]
    InvocationFailed {
        /// Exit code, `None` if the process was killed by a signal.
        exit_code: Option<i32>,
        /// Last lines of the timing tool's standard error.
        stderr_tail: String,
    },

    /// The invocation did not finish before the configured timeout.
    #[error("invocation did not finish within {after:?}")]
    TimedOut {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The timing tool's export file was missing or unusable.
    #[error("bad result file {}: {reason}", .path.display())]
    MalformedResult {
        /// Path of the offending result file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Filesystem or process-spawn failure outside of the timing tool itself.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Short, stable name of the error kind, used to prefix failure messages.
    ///
    /// # Examples
    ///
    /// ```
    /// use evm_bench::Error;
    ///
    /// assert_eq!(Error::Interrupted.kind(), "Interrupted");
    /// ```
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionMissing { .. } => "PreconditionMissing",
            Self::BackendUnavailable { .. } => "BackendUnavailable",
            Self::InvocationFailed { .. } => "InvocationFailed",
            Self::TimedOut { .. } => "TimedOut",
            Self::MalformedResult { .. } => "MalformedResult",
            Self::Io { .. } => "Io",
            Self::Interrupted => "Interrupted",
        }
    }

    /// Exit code of the failed child process, if there was one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::InvocationFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}
