//! Locating compiled benchmark bytecode and backend executables on disk.
//!
//! Everything is resolved relative to a project root. Bytecode comes from the JSON artifacts an external build tool
//! (Foundry) leaves under [`DEFAULT_ARTIFACTS_DIR`], executables come from the per-backend candidate lists in
//! [`crate::runners`].
//!
//! Nothing here fails hard: a lookup either finds something or returns `None`, and the reason for skipping a
//! candidate is logged.
//!
//! # Examples
//!
//! ```no_run
//! use evm_bench::artifacts::Locator;
//!
//! let locator = Locator::new(".");
//! let bytecode = locator.find_bytecode("TenThousandHashes");
//! ```

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use ethers_core::{types::Bytes, utils::hex::FromHex};
use serde::Deserialize;

use crate::runners::Backend;

/// Build-output directory, relative to the project root, that holds contract artifacts.
pub const DEFAULT_ARTIFACTS_DIR: &str = "out";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactRecord {
    deployed_bytecode: DeployedBytecode,
}

#[derive(Deserialize)]
struct DeployedBytecode {
    object: String,
}

/// Resolves benchmark bytecode and backend executables under a project root.
#[derive(Clone, Debug)]
pub struct Locator {
    root: PathBuf,
    artifacts_dir: PathBuf,
}

impl Locator {
    /// Creates a locator rooted at `root`, reading artifacts from `root/out`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let artifacts_dir = root.join(DEFAULT_ARTIFACTS_DIR);
        Self {
            root,
            artifacts_dir,
        }
    }

    /// Overrides the artifact directory. Relative paths are taken relative to the project root.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    ///
    /// use evm_bench::artifacts::Locator;
    ///
    /// let locator = Locator::new("/project").with_artifacts_dir("build/contracts");
    /// assert_eq!(locator.artifacts_dir(), Path::new("/project/build/contracts"));
    /// ```
    #[must_use]
    pub fn with_artifacts_dir(mut self, artifacts_dir: impl AsRef<Path>) -> Self {
        self.artifacts_dir = self.root.join(artifacts_dir);
        self
    }

    /// Project root everything is resolved against.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory searched for contract artifacts.
    #[must_use]
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Finds the deployed bytecode of `contract` in the artifact tree.
    ///
    /// Every `<contract>.json` file under the artifact directory is a candidate, visited in path order. The first one
    /// that parses and carries a non-empty `deployedBytecode.object` wins; the others are skipped with a warning.
    pub fn find_bytecode(&self, contract: &str) -> Option<Bytes> {
        let pattern = format!(
            "{}/**/{}.json",
            glob::Pattern::escape(&self.artifacts_dir.to_string_lossy()),
            glob::Pattern::escape(contract),
        );
        log::debug!("[{contract}] searching for artifacts matching {pattern}...");

        let bytecode = glob::glob(&pattern)
            .map_err(|err| {
                log::warn!("[{contract}] could not build artifact pattern: {err}, skipping...");
            })
            .ok()?
            .filter_map(|r| {
                r.map_err(|err| {
                    log::warn!("[{contract}] could not get globbed path: {err}, skipping...");
                })
                .ok()
            })
            .find_map(|path| read_artifact(contract, &path));

        if bytecode.is_none() {
            log::debug!("[{contract}] no usable artifact found");
        }
        bytecode
    }

    /// Reads pre-generated hex bytecode from `relative_path` under the project root.
    pub fn read_hex_file(&self, relative_path: &Path) -> Option<Bytes> {
        let path = self.root.join(relative_path);
        let text = fs::read_to_string(&path)
            .map_err(|err| {
                log::debug!("could not read hex file {}: {err}", path.display());
            })
            .ok()?;
        decode_hex(&text)
            .map_err(|err| {
                log::warn!("could not decode hex file {}: {err}, skipping...", path.display());
            })
            .ok()
    }

    /// Resolves the executable for `backend`.
    ///
    /// Candidate paths are tried in priority order relative to the project root, then the backend's `PATH` fallback
    /// (if it has one). Resolution is never cached, so a backend built between two calls is picked up by the second.
    pub fn find_executable<B: Backend + ?Sized>(&self, backend: &B) -> Option<PathBuf> {
        let id = backend.id();
        for candidate in backend.candidates() {
            let path = self.root.join(candidate);
            log::trace!("[{id}] trying {}", path.display());
            if path.is_file() {
                let path = path.canonicalize().unwrap_or(path);
                log::debug!("[{id}] resolved executable {}", path.display());
                return Some(path);
            }
        }

        let name = backend.path_fallback()?;
        match which::which(name) {
            Ok(path) => {
                log::debug!("[{id}] resolved executable {} from PATH", path.display());
                Some(path)
            }
            Err(err) => {
                log::debug!("[{id}] {name} not on PATH: {err}");
                None
            }
        }
    }
}

fn read_artifact(contract: &str, path: &Path) -> Option<Bytes> {
    log::debug!("[{contract}] processing artifact ({})...", path.display());

    let record: ArtifactRecord = serde_json::from_reader(
        File::open(path)
            .map_err(|err| {
                log::warn!("[{contract}] could not open artifact: {err}, skipping...");
            })
            .ok()?,
    )
    .map_err(|err| {
        log::warn!("[{contract}] could not deserialize artifact: {err}, skipping...");
    })
    .ok()?;

    decode_hex(&record.deployed_bytecode.object)
        .map_err(|err| {
            log::warn!("[{contract}] unusable deployed bytecode: {err}, skipping...");
        })
        .ok()
}

/// Decodes a hex string with an optional `0x` prefix and surrounding whitespace, rejecting empty payloads.
pub(crate) fn decode_hex(text: &str) -> Result<Bytes, String> {
    let text = text.trim();
    let digits = text.strip_prefix("0x").unwrap_or(text);
    let bytes = Bytes::from_hex(digits).map_err(|err| err.to_string())?;
    if bytes.is_empty() {
        return Err("empty bytecode".to_string());
    }
    Ok(bytes)
}
