use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use ethers_core::{types::Bytes, utils::keccak256};

use super::BenchmarkDefinition;
use crate::{artifacts::Locator, exec::TIMING_TOOL};

/// Where a known case gets its bytecode from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BytecodeSource {
    /// Deployed bytecode of the named contract in the artifact tree.
    Artifact(&'static str),
    /// Pre-generated hex file, relative to the project root.
    HexFile(&'static str),
}

impl Display for BytecodeSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Artifact(contract) => write!(f, "{contract}"),
            Self::HexFile(path) => write!(f, "{path}"),
        }
    }
}

/// Static metadata of a benchmark case, before its bytecode is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownCase {
    /// Unique benchmark name.
    pub name: &'static str,
    /// Human readable description.
    pub description: &'static str,
    /// Category tag.
    pub category: &'static str,
    /// Bytecode source.
    pub source: BytecodeSource,
    /// Signature of the function to call, hashed into the call input selector.
    pub signature: &'static str,
    /// Gas limit for the call.
    pub gas_limit: u64,
}

impl KnownCase {
    /// Looks up this case's bytecode.
    pub fn bytecode(&self, locator: &Locator) -> Option<Bytes> {
        match self.source {
            BytecodeSource::Artifact(contract) => locator.find_bytecode(contract),
            BytecodeSource::HexFile(path) => locator.read_hex_file(Path::new(path)),
        }
    }

    /// Call input: the 4-byte selector of [`KnownCase::signature`].
    ///
    /// # Examples
    ///
    /// ```
    /// use evm_bench::benchmarks::KNOWN_CASES;
    ///
    /// assert_eq!(KNOWN_CASES[0].calldata().to_vec(), vec![0x30, 0x62, 0x7b, 0x7c]);
    /// ```
    #[must_use]
    pub fn calldata(&self) -> Bytes {
        Bytes::from(keccak256(self.signature.as_bytes())[..4].to_vec())
    }

    pub(super) fn definition(&self, bytecode: Bytes) -> BenchmarkDefinition {
        BenchmarkDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            category: self.category.to_string(),
            bytecode,
            calldata: self.calldata(),
            gas_limit: self.gas_limit,
            requires: vec![TIMING_TOOL.to_string()],
        }
    }
}

/// Every benchmark case this crate knows how to run.
pub const KNOWN_CASES: &[KnownCase] = &[
    KnownCase {
        name: "ten_thousand_hashes",
        description: "Execute 10,000 keccak256 hash operations",
        category: "compute",
        source: BytecodeSource::Artifact("TenThousandHashes"),
        signature: "Benchmark()",
        gas_limit: 30_000_000,
    },
    KnownCase {
        name: "snailtracer",
        description: "Ray tracing benchmark (compute intensive)",
        category: "compute",
        source: BytecodeSource::HexFile("benchmarks/snailtracer/snailtracer_runtime.hex"),
        signature: "Benchmark()",
        gas_limit: 1_000_000_000,
    },
    KnownCase {
        name: "erc20_transfer_bench",
        description: "Benchmark ERC20 transfer operations",
        category: "token",
        source: BytecodeSource::Artifact("ERC20Transfer"),
        signature: "Benchmark()",
        gas_limit: 30_000_000,
    },
    KnownCase {
        name: "erc20_mint_bench",
        description: "Benchmark ERC20 minting operations",
        category: "token",
        source: BytecodeSource::Artifact("ERC20Mint"),
        signature: "Benchmark()",
        gas_limit: 30_000_000,
    },
    KnownCase {
        name: "erc20_approval_bench",
        description: "Benchmark ERC20 approval and transfer operations",
        category: "token",
        source: BytecodeSource::Artifact("ERC20ApprovalTransfer"),
        signature: "Benchmark()",
        gas_limit: 30_000_000,
    },
];
