//! The external timing tool and other required executables.

use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
};

use semver::Version;

use crate::{Error, Result};

/// Name of the statistical timing tool every benchmark runs under.
pub const TIMING_TOOL: &str = "hyperfine";

const INSTALL_HINT: &str =
    "see https://github.com/sharkdp/hyperfine#installation, e.g. `cargo install hyperfine`";

/// How to launch the timing tool.
///
/// `prefix_args` go before everything the invoker adds, which allows running the tool through a wrapper.
#[derive(Clone, Debug)]
pub struct TimingTool {
    program: PathBuf,
    prefix_args: Vec<OsString>,
}

impl TimingTool {
    /// Uses `program` as the timing tool.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Finds [`TIMING_TOOL`] on `PATH`.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionMissing`] if it is not installed.
    pub fn locate() -> Result<Self> {
        require(TIMING_TOOL).map(Self::new)
    }

    /// Adds arguments placed before the invoker's own.
    #[must_use]
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path of the program that is launched.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the tool with `--version` to make sure it starts, returning the reported version if it parses.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionMissing`] if the program does not exist, [`Error::Io`] if it cannot be started.
    pub fn validate(&self) -> Result<Option<Version>> {
        log::trace!("validating timing tool {}", self.program.display());
        match Command::new(&self.program)
            .args(&self.prefix_args)
            .arg("--version")
            .output()
        {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                log::debug!(
                    "found timing tool ({}): {}",
                    self.program.display(),
                    stdout.trim_end()
                );
                Ok(parse_version(&stdout))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::PreconditionMissing {
                tool: self.program.display().to_string(),
                hint: INSTALL_HINT.to_string(),
            }),
            Err(err) => Err(Error::io(
                format!("could not start {}", self.program.display()),
                err,
            )),
        }
    }

    /// Command launching the tool as the leader of a new process group, see [`ProcessGroup`].
    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.prefix_args);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

/// Kills the whole process group of a child started by [`TimingTool::command`] when dropped, unless released.
///
/// Killing the timing tool alone would orphan the backend process it is timing.
pub(crate) struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    pub(crate) fn of(child: &tokio::process::Child) -> Self {
        Self { leader: child.id() }
    }

    /// Leaves the group alone, for a child that exited on its own.
    pub(crate) fn release(mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(leader) = self.leader.take() else {
            return;
        };

        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(leader) else {
                return;
            };
            // SAFETY: killpg takes no pointers.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                log::debug!("killed process group {pgid}");
            } else {
                log::trace!(
                    "could not kill process group {pgid}: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        #[cfg(not(unix))]
        log::trace!("leaving process {leader} to kill-on-drop");
    }
}

/// Resolves a required tool on `PATH`.
///
/// # Errors
///
/// [`Error::PreconditionMissing`] if `tool` cannot be found.
pub fn require(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|err| {
        log::debug!("{tool} not found: {err}");
        Error::PreconditionMissing {
            tool: tool.to_string(),
            hint: if tool == TIMING_TOOL {
                INSTALL_HINT.to_string()
            } else {
                format!("install {tool} and make sure it is on PATH")
            },
        }
    })
}

/// Pulls the first semantic version out of a `--version` banner such as `hyperfine 1.18.0`.
fn parse_version(banner: &str) -> Option<Version> {
    banner
        .split_whitespace()
        .find_map(|word| Version::parse(word.trim_start_matches('v')).ok())
}
