//! Backend adapters: how each EVM implementation is found and invoked.
//!
//! Every backend is an external executable with its own command-line contract. The [`Backend`] trait captures what
//! differs between them (where the binary lives, which flags it takes, which environment it wants) and provides the
//! shared part: resolving the executable and turning a [`BenchmarkDefinition`] into an [`Invocation`].
//!
//! Adding a backend means adding a [`BackendId`] variant and one [`Backend`] implementation.
//!
//! # Examples
//!
//! ```no_run
//! use evm_bench::{artifacts::Locator, runners::BackendId, Registry};
//!
//! # fn main() -> evm_bench::Result<()> {
//! let locator = Locator::new(".");
//! let registry = Registry::build(&locator);
//! let definition = registry.get("ten_thousand_hashes").expect("benchmark not built");
//!
//! let invocation = BackendId::Revm.backend().build_invocation(&locator, definition, None)?;
//! println!("{}", invocation.command_line());
//! # Ok(())
//! # }
//! ```

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use ethers_core::utils::hex;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::{artifacts::Locator, benchmarks::BenchmarkDefinition, Error, Result};

mod geth;
mod guillotine;
mod revm;

pub use geth::GethEvm;
pub use guillotine::GuillotineBench;
pub use revm::Revme;

/// Identity of a supported backend.
///
/// # Examples
///
/// ```
/// use evm_bench::runners::BackendId;
///
/// let id: BackendId = "guillotine".parse().unwrap();
///
/// assert_eq!(id, BackendId::Guillotine);
/// assert_eq!(id.to_string(), "guillotine");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// go-ethereum's standalone `evm` tool.
    Geth,
    /// revm's `revme` tool.
    Revm,
    /// Guillotine's `guillotine-bench` tool.
    Guillotine,
}

impl BackendId {
    /// Every supported backend, in default run order.
    pub const ALL: [Self; 3] = [Self::Geth, Self::Revm, Self::Guillotine];

    /// Lowercase identifier used on the command line and in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geth => "geth",
            Self::Revm => "revm",
            Self::Guillotine => "guillotine",
        }
    }

    /// The adapter for this backend.
    #[must_use]
    pub fn backend(self) -> &'static dyn Backend {
        match self {
            Self::Geth => &GethEvm,
            Self::Revm => &Revme,
            Self::Guillotine => &GuillotineBench,
        }
    }
}

impl Display for BackendId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when parsing a name that is not a known backend.
#[derive(Debug, thiserror::Error)]
#[error("unknown EVM `{0}` (expected one of: geth, revm, guillotine)")]
pub struct UnknownBackend(String);

impl FromStr for BackendId {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownBackend(s.to_string()))
    }
}

/// A fully prepared backend invocation.
///
/// Owns the temporary file holding the benchmark bytecode; the file is deleted when the invocation is dropped,
/// whichever way the surrounding code exits.
#[derive(Debug)]
pub struct Invocation {
    /// Backend this invocation targets.
    pub backend: BackendId,
    /// Resolved backend executable.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    pub arguments: Vec<String>,
    /// Variables added to the child environment, on top of the inherited one.
    pub environment: BTreeMap<String, String>,
    codefile: TempPath,
}

impl Invocation {
    /// Path of the temporary bytecode file referenced by the arguments.
    #[must_use]
    pub fn codefile(&self) -> &Path {
        &self.codefile
    }

    /// The executable and its arguments as a single shell-safe command string.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.to_string_lossy().into_owned())
            .chain(self.arguments.iter().cloned())
            .map(|word| shell_quote(&word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Shared capability of every backend adapter.
pub trait Backend: Sync {
    /// Identity of this backend.
    fn id(&self) -> BackendId;

    /// Executable locations relative to the project root, highest priority first.
    fn candidates(&self) -> &'static [&'static str];

    /// Name to look up on `PATH` once every candidate missed, if the backend supports it.
    fn path_fallback(&self) -> Option<&'static str>;

    /// Remediation hint shown when the executable cannot be found.
    fn hint(&self) -> &'static str;

    /// Backend-specific arguments for running `codefile` with `gas` and optional hex call input.
    fn arguments(&self, codefile: &str, gas: u64, input: Option<&str>) -> Vec<String>;

    /// Extra environment for the child process.
    fn environment(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Resolves this backend's executable; see [`Locator::find_executable`].
    fn resolve_executable(&self, locator: &Locator) -> Option<PathBuf> {
        locator.find_executable(self)
    }

    /// Prepares an invocation of `definition` on this backend.
    ///
    /// The executable is resolved before anything touches the filesystem, so an unavailable backend never leaves a
    /// temporary file behind.
    ///
    /// # Errors
    ///
    /// [`Error::BackendUnavailable`] if the executable cannot be resolved, [`Error::Io`] if the bytecode file cannot
    /// be written.
    fn build_invocation(
        &self,
        locator: &Locator,
        definition: &BenchmarkDefinition,
        gas_override: Option<u64>,
    ) -> Result<Invocation> {
        let backend = self.id();
        let executable =
            self.resolve_executable(locator)
                .ok_or_else(|| Error::BackendUnavailable {
                    backend,
                    hint: self.hint().to_string(),
                })?;

        let mut file = tempfile::Builder::new()
            .prefix("bytecode-")
            .suffix(".hex")
            .tempfile()
            .map_err(|err| Error::io("could not create bytecode file", err))?;
        let bytecode = hex::encode(&definition.bytecode);
        file.write_all(bytecode.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| Error::io("could not write bytecode file", err))?;
        let codefile = file.into_temp_path();

        let gas = gas_override.unwrap_or(definition.gas_limit);
        let input = hex::encode(&definition.calldata);
        let arguments = self.arguments(
            &codefile.to_string_lossy(),
            gas,
            Some(input.as_str()).filter(|input| !input.is_empty()),
        );
        let environment = self
            .environment()
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();

        log::trace!(
            "[{backend}/{}] invocation: {} {arguments:?} (env: {environment:?})",
            definition.name,
            executable.display()
        );

        Ok(Invocation {
            backend,
            executable,
            arguments,
            environment,
            codefile,
        })
    }
}

/// Backends whose executable currently resolves, in [`BackendId::ALL`] order.
pub fn available(locator: &Locator) -> Vec<BackendId> {
    BackendId::ALL
        .into_iter()
        .filter(|id| id.backend().resolve_executable(locator).is_some())
        .collect()
}

/// Single-quotes `word` if a POSIX shell would otherwise split or expand it.
pub(crate) fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
