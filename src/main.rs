use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sysinfo::{CpuExt, System, SystemExt};

use evm_bench::{
    artifacts::{Locator, DEFAULT_ARTIFACTS_DIR},
    exec::{self, TimingTool},
    run_matrix, runners, BackendId, Error, Invoker, MatrixResult, Outcome, Registry,
};

/// 🚀🪑 evm-bench is a suite of Ethereum Virtual Machine stress tests and benchmarks.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run benchmarks against EVM backends
    Run(RunArgs),
    /// List discovered benchmarks and available backends
    List(ListArgs),
}

#[derive(clap::Args)]
struct ProjectArgs {
    /// Project root that artifacts and backend build outputs are resolved against
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Compiled contract artifact directory, relative to the root
    #[arg(long, default_value = DEFAULT_ARTIFACTS_DIR)]
    artifacts: PathBuf,
}

impl ProjectArgs {
    fn locator(&self) -> anyhow::Result<Locator> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("could not resolve project root {}", self.root.display()))?;
        Ok(Locator::new(root).with_artifacts_dir(&self.artifacts))
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// Only run the benchmark with this name
    benchmark: Option<String>,

    /// Number of timed runs per benchmark
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,

    /// Number of untimed warmup runs per benchmark
    #[arg(short, long, default_value_t = 3)]
    warmup: u32,

    /// Comma-separated backends to run [default: every available backend]
    #[arg(long, value_delimiter = ',')]
    evm: Vec<BackendId>,

    /// Gas limit replacing every benchmark's own
    #[arg(long)]
    gas: Option<u64>,

    /// Seconds after which a single invocation is killed and recorded as failed
    #[arg(long)]
    timeout: Option<u64>,

    /// Directory the timing tool writes per-benchmark result files into [default: the project root]
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Path to a directory to dump the matrix report in
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log commands and timing tool output
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    project: ProjectArgs,
}

#[derive(clap::Args)]
struct ListArgs {
    /// Only list benchmarks in this category
    #[arg(long)]
    category: Option<String>,

    #[command(flatten)]
    project: ProjectArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    human_panic::setup_panic!();
    env_logger::init();

    let args = Args::parse();
    let result = match args.command {
        Command::Run(args) => run(args).await,
        Command::List(args) => list(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Interrupted)) => {
            log::error!("interrupted");
            ExitCode::from(130)
        }
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let start_time = Utc::now();
    log_host();

    let locator = args.project.locator()?;
    let registry = Registry::build(&locator);
    for source in registry.missing() {
        log::warn!("could not find bytecode for {source}, skipping...");
    }

    let definitions = match &args.benchmark {
        Some(name) => match registry.get(name) {
            Some(definition) => vec![definition.clone()],
            None => bail!(
                "unknown benchmark `{name}` (available: {})",
                registry.names().join(", ")
            ),
        },
        None => registry.into_definitions(),
    };
    if definitions.is_empty() {
        bail!(
            "no benchmarks found under {}, build the contracts first",
            locator.artifacts_dir().display()
        );
    }

    let required: BTreeSet<&str> = definitions
        .iter()
        .flat_map(|definition| definition.requires.iter().map(String::as_str))
        .collect();
    for tool in required {
        exec::require(tool)?;
    }
    let timing_tool = TimingTool::locate()?;
    match timing_tool.validate()? {
        Some(version) => log::info!("using {} {version}", exec::TIMING_TOOL),
        None => log::warn!(
            "could not determine {} version, continuing...",
            exec::TIMING_TOOL
        ),
    }

    let backends = if args.evm.is_empty() {
        let available = runners::available(&locator);
        if available.is_empty() {
            bail!("no EVM backend executables found under {}", locator.root().display());
        }
        available
    } else {
        args.evm
    };

    let results_dir = args
        .results_dir
        .unwrap_or_else(|| locator.root().to_path_buf());
    let invoker = Invoker::new(locator, timing_tool)
        .with_results_dir(results_dir)
        .with_timeout(args.timeout.map(Duration::from_secs))
        .with_gas_override(args.gas)
        .verbose(args.verbose);

    let matrix = run_matrix(
        &invoker,
        &definitions,
        &backends,
        args.iterations,
        args.warmup,
    )
    .await?;

    print_summary(&matrix);

    if let Some(output) = args.output {
        let output_file_path = output.join(format!(
            "matrix.{}.json",
            start_time.format("%Y-%m-%dT%H-%M-%S%z")
        ));
        log::info!(
            "writing matrix report to {}...",
            output_file_path.to_string_lossy()
        );
        matrix.write_report(&output_file_path)?;
    }

    Ok(())
}

fn list(args: &ListArgs) -> anyhow::Result<()> {
    let locator = args.project.locator()?;
    let registry = Registry::build(&locator);

    let mut by_category: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for definition in registry.iter() {
        if args
            .category
            .as_deref()
            .map_or(true, |category| category == definition.category)
        {
            by_category
                .entry(definition.category.as_str())
                .or_default()
                .push(definition);
        }
    }

    for (category, definitions) in &by_category {
        println!("{category}:");
        for definition in definitions {
            println!(
                "  {:<24} {} (gas: {})",
                definition.name, definition.description, definition.gas_limit
            );
        }
    }
    if by_category.is_empty() {
        println!("no benchmarks found under {}", locator.artifacts_dir().display());
    }

    if !registry.missing().is_empty() {
        println!("\nnot built: {}", registry.missing().join(", "));
    }

    println!("\nbackends:");
    for id in BackendId::ALL {
        match id.backend().resolve_executable(&locator) {
            Some(path) => println!("  {id:<12} {}", path.display()),
            None => println!("  {id:<12} not found ({})", id.backend().hint()),
        }
    }

    Ok(())
}

fn print_summary(matrix: &MatrixResult) {
    println!();
    for (backend, benchmark, outcome) in matrix.iter() {
        match outcome {
            Outcome::Success(timing) => println!(
                "{:<36} mean {} ± {} (min {}, max {})",
                format!("{backend}/{benchmark}"),
                format_seconds(timing.mean),
                format_seconds(timing.stddev),
                format_seconds(timing.min),
                format_seconds(timing.max),
            ),
            Outcome::Failure(failure) => {
                println!("{:<36} {}", format!("{backend}/{benchmark}"), failure.message);
            }
        }
    }
}

fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.3} s")
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else {
        format!("{:.1} µs", secs * 1e6)
    }
}

fn log_host() {
    let system = System::new_all();
    log::info!(
        "host: {} {} (kernel {}), {} ({} cores), {} MiB memory",
        system.name().unwrap_or_else(|| "unknown".to_string()),
        system.os_version().unwrap_or_else(|| "unknown".to_string()),
        system
            .kernel_version()
            .unwrap_or_else(|| "unknown".to_string()),
        system
            .cpus()
            .first()
            .map_or("unknown cpu", |cpu| cpu.brand()),
        system.physical_core_count().unwrap_or(system.cpus().len()),
        system.total_memory() / (1024 * 1024),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_seconds_by_magnitude() {
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.500 s");
        assert_eq!(format_seconds(Duration::from_micros(2500)), "2.500 ms");
        assert_eq!(format_seconds(Duration::from_nanos(1500)), "1.5 µs");
    }

    #[test]
    fn parses_run_arguments() {
        let args = Args::try_parse_from([
            "evm-bench",
            "run",
            "snailtracer",
            "--evm",
            "geth,revm",
            "-i",
            "20",
            "--timeout",
            "60",
        ])
        .expect("valid arguments");
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.benchmark.as_deref(), Some("snailtracer"));
        assert_eq!(run.evm, [BackendId::Geth, BackendId::Revm]);
        assert_eq!(run.iterations, 20);
        assert_eq!(run.warmup, 3);
        assert_eq!(run.timeout, Some(60));
        assert_eq!(run.project.artifacts, PathBuf::from("out"));
    }

    #[test]
    fn rejects_bad_run_arguments() {
        assert!(Args::try_parse_from(["evm-bench", "run", "--evm", "evmone"]).is_err());
        assert!(Args::try_parse_from(["evm-bench", "run", "-i", "0"]).is_err());
    }
}
