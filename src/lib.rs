//! Benchmark orchestration for Ethereum Virtual Machine implementations.
//!
//! evm-bench runs the same set of EVM bytecode benchmarks against several independent EVM implementations and
//! collects comparable timing statistics for each (backend, benchmark) pair. It does not execute EVM code itself:
//! every backend is an external executable, and every measurement is taken by an external statistical timing tool
//! ([hyperfine]).
//!
//! # Pipeline
//! 1. [`artifacts::Locator`] finds compiled contract bytecode and backend executables under a project root.
//! 2. [`Registry::build`] turns the hard-coded list of known cases into runnable [`BenchmarkDefinition`]s, skipping
//!    cases whose bytecode has not been built.
//! 3. A [`Backend`] turns a definition into a concrete command line for its executable.
//! 4. [`Invoker`] runs that command under the timing tool and parses the exported statistics into a
//!    [`TimingResult`].
//! 5. [`run_matrix`] does this for every requested backend and benchmark and returns a [`MatrixResult`].
//!
//! # Usage
//! evm-bench is primarily designed to be used as an executable, but it can also be used as a library for more
//! granular control over the benchmarking scope.
//!
//! ## As an executable
//! ```console
//! $ cargo install evm-bench
//! $ evm-bench --help
//! 🚀🪑 evm-bench is a suite of Ethereum Virtual Machine stress tests and benchmarks.
//!
//! Usage: evm-bench <COMMAND>
//!
//! Commands:
//!   run   Run benchmarks against EVM backends
//!   list  List discovered benchmarks and available backends
//!   help  Print this message or the help of the given subcommand(s)
//! ```
//!
//! Run it from a checkout with compiled benchmark contracts (`forge build` produces the `out/` artifact tree) and at
//! least one built backend:
//!
//! ```console
//! $ RUST_LOG=info evm-bench run ten_thousand_hashes --evm geth,revm -i 20 -o results
//! ```
//!
//! ## As a library
//! ```no_run
//! use evm_bench::{artifacts::Locator, exec::TimingTool, run_matrix, runners, Invoker, Registry};
//!
//! # #[tokio::main]
//! # async fn main() -> evm_bench::Result<()> {
//! let locator = Locator::new(".");
//! let registry = Registry::build(&locator);
//! let backends = runners::available(&locator);
//!
//! let invoker = Invoker::new(locator, TimingTool::locate()?);
//! let matrix = run_matrix(&invoker, &registry.into_definitions(), &backends, 10, 3).await?;
//! for (backend, benchmark, outcome) in matrix.iter() {
//!     println!("{backend}/{benchmark}: {outcome:?}");
//! }
//! #     Ok(())
//! # }
//! ```
//!
//! [hyperfine]: https://github.com/sharkdp/hyperfine

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod artifacts;
pub mod benchmarks;
mod error;
pub mod exec;
pub mod results;
pub mod runners;
pub mod runs;

pub use artifacts::Locator;
pub use benchmarks::{BenchmarkDefinition, Registry};
pub use error::{Error, Result};
pub use results::{Failure, MatrixResult, Outcome, TimingResult};
pub use runners::{Backend, BackendId};
pub use runs::{run_matrix, Invoker};
