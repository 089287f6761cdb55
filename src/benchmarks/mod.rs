//! Utilities for discovering benchmarks.
//!
//! The primary entrypoint for this module is [`Registry::build`], which pairs the hard-coded list of known
//! benchmark cases with whatever bytecode the [`Locator`] can find and returns the runnable [`BenchmarkDefinition`]s.
//!
//! # Examples
//!
//! ```no_run
//! use evm_bench::{artifacts::Locator, Registry};
//!
//! let registry = Registry::build(&Locator::new("."));
//!
//! for definition in registry.iter() {
//!     println!("{}: {}", definition.name, definition.description);
//! }
//! for source in registry.missing() {
//!     println!("not built: {source}");
//! }
//! ```

use ethers_core::types::Bytes;
use serde::{Deserialize, Serialize};

use crate::artifacts::Locator;

mod cases;

pub use cases::{BytecodeSource, KnownCase, KNOWN_CASES};

/// Total representation of a benchmark.
///
/// Encapsulates everything a backend needs to run the benchmark. Typically produced by [`Registry::build`], but can
/// be constructed by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDefinition {
    /// Unique name of this benchmark.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Category tag, e.g. `compute` or `token`.
    pub category: String,
    /// Deployed bytecode to execute. This is _not_ contract creation code.
    pub bytecode: Bytes,
    /// Call input, possibly empty.
    pub calldata: Bytes,
    /// Gas limit for the call.
    pub gas_limit: u64,
    /// External tools that must be installed to run this benchmark.
    pub requires: Vec<String>,
}

/// Snapshot of the runnable benchmarks.
///
/// Definitions keep the order of [`KNOWN_CASES`]; sort explicitly if a different display order is needed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registry {
    definitions: Vec<BenchmarkDefinition>,
    missing: Vec<String>,
}

impl Registry {
    /// Builds the registry from [`KNOWN_CASES`].
    ///
    /// Cases whose bytecode cannot be found are left out and their source is recorded in [`Registry::missing`].
    pub fn build(locator: &Locator) -> Self {
        Self::build_from(locator, KNOWN_CASES)
    }

    /// Builds the registry from an explicit list of cases.
    pub fn build_from(locator: &Locator, cases: &[KnownCase]) -> Self {
        log::info!(
            "discovering {} benchmarks under {}...",
            cases.len(),
            locator.root().display()
        );

        let mut registry = Self::default();
        for case in cases {
            if registry.get(case.name).is_some() {
                log::warn!("[{}] duplicate benchmark name, skipping...", case.name);
                continue;
            }
            match case.bytecode(locator) {
                Some(bytecode) => {
                    log::debug!(
                        "[{}] found {} bytes of bytecode",
                        case.name,
                        bytecode.len()
                    );
                    registry.definitions.push(case.definition(bytecode));
                }
                None => {
                    log::debug!("[{}] no bytecode for {}, skipping...", case.name, case.source);
                    registry.missing.push(case.source.to_string());
                }
            }
        }

        log::info!(
            "found {} benchmarks ({} not built)",
            registry.definitions.len(),
            registry.missing.len()
        );
        log::trace!("benchmarks: {:#?}", registry.definitions);
        registry
    }

    /// Looks up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BenchmarkDefinition> {
        self.definitions.iter().find(|definition| definition.name == name)
    }

    /// Iterates over definitions in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &BenchmarkDefinition> {
        self.definitions.iter()
    }

    /// Names of all definitions in discovery order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Bytecode sources that were searched for but not found.
    #[must_use]
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Number of runnable definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no benchmark could be built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Consumes the registry, returning the definitions.
    #[must_use]
    pub fn into_definitions(self) -> Vec<BenchmarkDefinition> {
        self.definitions
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;

    fn write_artifact(root: &Path, contract: &str, object: &str) {
        let dir = root.join("out").join(format!("{contract}.sol"));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join(format!("{contract}.json")),
            format!(r#"{{"deployedBytecode": {{"object": "{object}"}}}}"#),
        )
        .expect("write artifact");
    }

    #[test]
    fn empty_tree_reports_every_source_missing() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let registry = Registry::build(&Locator::new(tmp.path()));

        assert!(registry.is_empty());
        assert_eq!(registry.missing().len(), KNOWN_CASES.len());
        assert!(registry.missing().contains(&"TenThousandHashes".to_string()));
    }

    #[test]
    fn builds_discovered_cases_in_known_order() {
        let tmp = tempfile::tempdir().expect("temp dir");
        write_artifact(tmp.path(), "ERC20Mint", "0x6002");
        write_artifact(tmp.path(), "TenThousandHashes", "0xAB12");
        let hex = tmp.path().join("benchmarks/snailtracer");
        fs::create_dir_all(&hex).expect("mkdir");
        fs::write(hex.join("snailtracer_runtime.hex"), "6003\n").expect("write hex");

        let registry = Registry::build(&Locator::new(tmp.path()));

        assert_eq!(
            registry.names(),
            ["ten_thousand_hashes", "snailtracer", "erc20_mint_bench"]
        );
        let hashes = registry.get("ten_thousand_hashes").expect("hashes");
        assert_eq!(hashes.bytecode.to_vec(), vec![0xab, 0x12]);
        assert_eq!(hashes.calldata.to_vec(), vec![0x30, 0x62, 0x7b, 0x7c]);
        assert_eq!(hashes.gas_limit, 30_000_000);
        assert_eq!(hashes.requires, ["hyperfine"]);
        assert_eq!(
            registry.get("snailtracer").expect("snailtracer").gas_limit,
            1_000_000_000
        );
        assert_eq!(registry.missing(), ["ERC20Transfer", "ERC20ApprovalTransfer"]);
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let tmp = tempfile::tempdir().expect("temp dir");
        write_artifact(tmp.path(), "ERC20Transfer", "6001");
        let locator = Locator::new(tmp.path());

        assert_eq!(Registry::build(&locator), Registry::build(&locator));
    }

    #[test]
    fn prefix_only_bytecode_is_left_out() {
        let tmp = tempfile::tempdir().expect("temp dir");
        write_artifact(tmp.path(), "TenThousandHashes", "0x0x");
        write_artifact(tmp.path(), "ERC20Mint", "0X");

        let registry = Registry::build(&Locator::new(tmp.path()));
        assert!(registry.get("ten_thousand_hashes").is_none());
        assert!(registry.get("erc20_mint_bench").is_none());
        assert!(registry.missing().contains(&"TenThousandHashes".to_string()));
    }

    #[test]
    fn skips_duplicate_names() {
        let tmp = tempfile::tempdir().expect("temp dir");
        write_artifact(tmp.path(), "ERC20Transfer", "6001");
        let case = KNOWN_CASES
            .iter()
            .find(|case| case.name == "erc20_transfer_bench")
            .expect("known case");

        let registry = Registry::build_from(&Locator::new(tmp.path()), &[*case, *case]);
        assert_eq!(registry.len(), 1);
    }
}
