//! Orchestration for timing benchmarks on backends.
//!
//! [`Invoker::invoke`] times one benchmark on one backend by running the backend command under the timing tool.
//! [`run_matrix`] does that for every (backend, benchmark) cell, strictly one after the other, and collects a
//! [`MatrixResult`] in which a failed cell is recorded instead of aborting the run.
//!
//! # Examples
//!
//! ```no_run
//! use evm_bench::{artifacts::Locator, exec::TimingTool, run_matrix, runners::BackendId, Invoker, Registry};
//!
//! # #[tokio::main]
//! # async fn main() -> evm_bench::Result<()> {
//! let locator = Locator::new(".");
//! let registry = Registry::build(&locator);
//! let invoker = Invoker::new(locator, TimingTool::locate()?);
//!
//! let definitions = registry.into_definitions();
//! let matrix = run_matrix(&invoker, &definitions, &BackendId::ALL, 10, 3).await?;
//! #     Ok(())
//! # }
//! ```

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use futures::future::{self, Either};
use tokio::process::Command;

use crate::{
    artifacts::Locator,
    benchmarks::BenchmarkDefinition,
    exec::{ProcessGroup, TimingTool},
    results::{self, Failure, MatrixResult, Outcome, TimingResult},
    runners::BackendId,
    Error, Result,
};

/// Number of trailing standard error lines kept in an [`Error::InvocationFailed`].
const STDERR_TAIL_LINES: usize = 20;

/// Runs single benchmark invocations under the timing tool.
#[derive(Clone, Debug)]
pub struct Invoker {
    locator: Locator,
    timing_tool: TimingTool,
    results_dir: PathBuf,
    timeout: Option<Duration>,
    gas_override: Option<u64>,
    verbose: bool,
}

impl Invoker {
    /// Creates an invoker writing result files to the project root, with no timeout and no gas override.
    pub fn new(locator: Locator, timing_tool: TimingTool) -> Self {
        let results_dir = locator.root().to_path_buf();
        Self {
            locator,
            timing_tool,
            results_dir,
            timeout: None,
            gas_override: None,
            verbose: false,
        }
    }

    /// Directory the timing tool exports result files into.
    #[must_use]
    pub fn with_results_dir(mut self, results_dir: impl Into<PathBuf>) -> Self {
        self.results_dir = results_dir.into();
        self
    }

    /// Kills an invocation that runs longer than `timeout`, failing only that cell.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces every benchmark's gas limit.
    #[must_use]
    pub fn with_gas_override(mut self, gas: Option<u64>) -> Self {
        self.gas_override = gas;
        self
    }

    /// Asks the timing tool for its full output style and logs commands and that output at `info`.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Locator used to resolve backend executables.
    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Result file the timing tool writes for `benchmark`.
    ///
    /// Derived from the benchmark name only, so two invocations of the same benchmark must never overlap.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    ///
    /// use evm_bench::{artifacts::Locator, exec::TimingTool, Invoker};
    ///
    /// let invoker = Invoker::new(Locator::new("/project"), TimingTool::new("hyperfine"));
    /// assert_eq!(invoker.result_file("snailtracer"), Path::new("/project/results_snailtracer.json"));
    /// ```
    #[must_use]
    pub fn result_file(&self, benchmark: &str) -> PathBuf {
        self.results_dir.join(format!("results_{benchmark}.json"))
    }

    /// Times `definition` on `backend`.
    ///
    /// The bytecode temp file lives exactly as long as this call, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::BackendUnavailable`] if the backend executable cannot be resolved.
    /// - [`Error::InvocationFailed`] if the timing tool exits unsuccessfully.
    /// - [`Error::TimedOut`] if the configured timeout elapses.
    /// - [`Error::MalformedResult`] if the result file is unusable or has the wrong number of samples.
    /// - [`Error::Interrupted`] if Ctrl-C is received while the timing tool runs.
    /// - [`Error::Io`] for temp file, result file, or spawn failures.
    pub async fn invoke(
        &self,
        backend: BackendId,
        definition: &BenchmarkDefinition,
        iterations: u32,
        warmup: u32,
    ) -> Result<TimingResult> {
        let cell = format!("{backend}/{}", definition.name);
        let invocation =
            backend
                .backend()
                .build_invocation(&self.locator, definition, self.gas_override)?;

        let result_file = self.result_file(&definition.name);
        clear_stale(&result_file)?;
        fs::create_dir_all(&self.results_dir)
            .map_err(|err| Error::io("could not create results directory", err))?;

        let command_line = invocation.command_line();
        let mut command = self.timing_tool.command();
        command
            .arg("--runs")
            .arg(iterations.to_string())
            .arg("--warmup")
            .arg(warmup.to_string())
            .arg("--export-json")
            .arg(&result_file)
            .arg("--style")
            .arg(if self.verbose { "full" } else { "basic" })
            .arg("--")
            .arg(&command_line)
            .envs(&invocation.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.verbose {
            log::info!("[{cell}] timing `{command_line}` ({iterations} runs, {warmup} warmup)");
        } else {
            log::debug!("[{cell}] timing `{command_line}` ({iterations} runs, {warmup} warmup)");
        }
        log::trace!("[{cell}] command: {command:?}");

        let output = self.run(&mut command).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if self.verbose {
            log::info!("[{cell}] timing tool output\n{}", stdout.trim_end());
        } else {
            log::trace!("[{cell}] timing tool output\nstdout:\n{stdout}\nstderr:\n{stderr}");
        }

        if !output.status.success() {
            return Err(Error::InvocationFailed {
                exit_code: output.status.code(),
                stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        let timing = results::parse(&result_file)?;
        if timing.times.len() != iterations as usize {
            return Err(Error::malformed(
                &result_file,
                format!(
                    "expected {iterations} samples, found {}",
                    timing.times.len()
                ),
            ));
        }
        Ok(timing)
    }

    /// Spawns the timing tool and waits for it, racing it against the timeout and Ctrl-C.
    ///
    /// The Ctrl-C listener is registered before the child starts. Losing the race kills the child's whole process
    /// group, backend included.
    async fn run(&self, command: &mut Command) -> Result<Output> {
        let timeout = self.timeout;
        let program = self.timing_tool.program();
        let output = async move {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(err) => {
                    return Err(Error::io(
                        format!("could not start {}", program.display()),
                        err,
                    ))
                }
            };
            let group = ProcessGroup::of(&child);
            let waited = match timeout {
                Some(after) => tokio::time::timeout(after, child.wait_with_output())
                    .await
                    .map_err(|_| Error::TimedOut { after }),
                None => Ok(child.wait_with_output().await),
            };
            match waited {
                Ok(Ok(output)) => {
                    group.release();
                    Ok(output)
                }
                Ok(Err(err)) => Err(Error::io("could not wait for timing tool", err)),
                Err(err) => Err(err),
            }
        };
        let interrupt = tokio::signal::ctrl_c();
        futures::pin_mut!(interrupt, output);

        match future::select(interrupt, output).await {
            Either::Left((Ok(()), _)) => Err(Error::Interrupted),
            Either::Left((Err(err), output)) => {
                log::warn!("could not listen for Ctrl-C: {err}, continuing...");
                output.await
            }
            Either::Right((output, _)) => output,
        }
    }
}

/// Runs every benchmark on every backend.
///
/// Backends are run in the given order, each over all benchmarks in the given order, one cell at a time. Repeated
/// backends and repeated benchmark names are only run once, keeping the first occurrence. Every cell ends up in the
/// returned matrix: a failing cell is recorded as a [`Failure`] and the run moves on.
///
/// # Errors
///
/// Only [`Error::Interrupted`]: the run stops immediately and no further cells are attempted.
pub async fn run_matrix(
    invoker: &Invoker,
    definitions: &[BenchmarkDefinition],
    backends: &[BackendId],
    iterations: u32,
    warmup: u32,
) -> Result<MatrixResult> {
    let mut distinct: Vec<BackendId> = Vec::with_capacity(backends.len());
    for &backend in backends {
        if distinct.contains(&backend) {
            log::warn!("[{backend}] requested more than once, skipping...");
        } else {
            distinct.push(backend);
        }
    }
    let mut benchmarks: Vec<&BenchmarkDefinition> = Vec::with_capacity(definitions.len());
    for definition in definitions {
        if benchmarks.iter().any(|kept| kept.name == definition.name) {
            log::warn!("[{}] requested more than once, skipping...", definition.name);
        } else {
            benchmarks.push(definition);
        }
    }

    log::info!(
        "running {} benchmarks on {} backends...",
        benchmarks.len(),
        distinct.len()
    );

    // Cells are awaited one at a time on purpose. Running them concurrently would make them compete for the machine
    // and skew the timings, and two cells of the same benchmark would write the same result file.
    let mut matrix = MatrixResult::default();
    for &backend in &distinct {
        for &definition in &benchmarks {
            let cell = format!("{backend}/{}", definition.name);
            let outcome = match invoker
                .invoke(backend, definition, iterations, warmup)
                .await
            {
                Ok(timing) => {
                    log::info!(
                        "[{cell}] run finished with {} passes (mean: {:?} ± {:?})",
                        timing.times.len(),
                        timing.mean,
                        timing.stddev
                    );
                    Outcome::Success(timing)
                }
                Err(Error::Interrupted) => {
                    log::warn!("[{cell}] interrupted, abandoning the remaining cells");
                    return Err(Error::Interrupted);
                }
                Err(err) => {
                    log::warn!("[{cell}] {err}, continuing...");
                    Outcome::Failure(Failure::from(&err))
                }
            };
            matrix.insert(backend, &definition.name, outcome);
        }
    }

    log::info!(
        "matrix finished with {} cells ({} failed)",
        matrix.len(),
        matrix.failures().count()
    );
    Ok(matrix)
}

fn clear_stale(result_file: &Path) -> Result<()> {
    match fs::remove_file(result_file) {
        Ok(()) => {
            log::debug!("removed stale result file {}", result_file.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(
            format!("could not remove stale {}", result_file.display()),
            err,
        )),
    }
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        fs,
        sync::{Mutex, MutexGuard, PoisonError},
    };

    use super::*;
    use crate::runners::tests::{definition, install};

    // A SIGINT reaches every invocation waiting in this process, so fixtures run one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    const PARSE_ARGS: &str = r#"
runs=0; out=""; cmd=""
while [ $# -gt 0 ]; do
  case "$1" in
    --runs) runs="$2"; shift 2 ;;
    --export-json) out="$2"; shift 2 ;;
    --) cmd="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '%s|%s\n' "${GUILLOTINE_LOG_LEVEL:-unset}" "$cmd" >> "$(dirname "$out")/invocations.log"
"#;

    const SUCCEED: &str = r#"
times=""; i=0
while [ "$i" -lt "$runs" ]; do times="$times${times:+,}0.002"; i=$((i+1)); done
printf '{"results":[{"mean":0.002,"stddev":0.0,"min":0.002,"max":0.002,"times":[%s]}]}' "$times" > "$out"
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        _serial: MutexGuard<'static, ()>,
    }

    impl Fixture {
        fn new(script: &str) -> Self {
            let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
            let dir = tempfile::tempdir().expect("temp dir");
            fs::write(dir.path().join("fake-hyperfine.sh"), format!("{PARSE_ARGS}{script}"))
                .expect("write fake timing tool");
            fs::create_dir_all(dir.path().join("results")).expect("mkdir results");
            Self {
                dir,
                _serial: serial,
            }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn invoker(&self) -> Invoker {
            let tool = TimingTool::new("/bin/sh").with_prefix_args([self.root().join("fake-hyperfine.sh")]);
            Invoker::new(Locator::new(self.root()), tool).with_results_dir(self.root().join("results"))
        }

        fn invocations(&self) -> Vec<String> {
            fs::read_to_string(self.root().join("results/invocations.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn codefiles(&self) -> Vec<PathBuf> {
            self.invocations()
                .iter()
                .filter_map(|line| {
                    let words: Vec<&str> = line.split_whitespace().collect();
                    let flag = words
                        .iter()
                        .position(|w| *w == "--path" || *w == "--codefile")?;
                    words.get(flag + 1).map(PathBuf::from)
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn times_benchmark_and_cleans_up() {
        let fixture = Fixture::new(SUCCEED);
        install(fixture.root(), "revm/target/release/revme");

        let timing = fixture
            .invoker()
            .invoke(BackendId::Revm, &definition(&[0x30, 0x62, 0x7b, 0x7c]), 10, 3)
            .await
            .expect("invoke");

        assert_eq!(timing.times.len(), 10);
        assert!(timing.min <= timing.mean && timing.mean <= timing.max);

        let invocations = fixture.invocations();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].starts_with("unset|"));
        assert!(invocations[0].contains(" evm --path "));
        assert!(invocations[0].ends_with("--gas-limit 30000000 --input 30627b7c"));

        let codefiles = fixture.codefiles();
        assert_eq!(codefiles.len(), 1);
        assert!(!codefiles[0].exists());
    }

    #[tokio::test]
    async fn passes_environment_overrides_and_gas_override() {
        let fixture = Fixture::new(SUCCEED);
        install(fixture.root(), "apps/cli/guillotine-bench");

        fixture
            .invoker()
            .with_gas_override(Some(42))
            .invoke(BackendId::Guillotine, &definition(&[]), 2, 0)
            .await
            .expect("invoke");

        let invocations = fixture.invocations();
        assert!(invocations[0].starts_with("error|"));
        assert!(invocations[0].ends_with("--gas 42"));
    }

    #[tokio::test]
    async fn failed_tool_reports_exit_code_and_stderr_tail() {
        let fixture = Fixture::new("echo 'loading' >&2\necho 'backend exploded' >&2\nexit 3\n");
        install(fixture.root(), "evms/go-ethereum/build/bin/evm");

        let err = fixture
            .invoker()
            .invoke(BackendId::Geth, &definition(&[]), 10, 3)
            .await
            .expect_err("tool fails");

        match err {
            Error::InvocationFailed {
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr_tail, "loading\nbackend exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        let codefiles = fixture.codefiles();
        assert_eq!(codefiles.len(), 1);
        assert!(!codefiles[0].exists());
    }

    #[tokio::test]
    async fn short_sample_list_is_malformed() {
        let fixture = Fixture::new(
            r#"printf '{"results":[{"mean":0.002,"stddev":0.0,"min":0.002,"max":0.002,"times":[0.002]}]}' > "$out""#,
        );
        install(fixture.root(), "revm/target/release/revme");

        let err = fixture
            .invoker()
            .invoke(BackendId::Revm, &definition(&[]), 5, 0)
            .await
            .expect_err("wrong sample count");
        assert_eq!(err.kind(), "MalformedResult");
    }

    #[tokio::test]
    async fn missing_result_file_is_malformed_even_if_stale_one_existed() {
        let fixture = Fixture::new("exit 0\n");
        install(fixture.root(), "revm/target/release/revme");
        let invoker = fixture.invoker();
        fs::write(
            invoker.result_file("sample"),
            r#"{"results":[{"mean":0.002,"stddev":0.0,"min":0.002,"max":0.002,"times":[0.002]}]}"#,
        )
        .expect("write stale result");

        let err = invoker
            .invoke(BackendId::Revm, &definition(&[]), 1, 0)
            .await
            .expect_err("no fresh result");
        assert_eq!(err.kind(), "MalformedResult");
    }

    #[tokio::test]
    async fn timeout_kills_the_cell() {
        let fixture = Fixture::new("exec sleep 5\n");
        install(fixture.root(), "revm/target/release/revme");

        let err = fixture
            .invoker()
            .with_timeout(Some(Duration::from_millis(200)))
            .invoke(BackendId::Revm, &definition(&[]), 1, 0)
            .await
            .expect_err("times out");
        assert!(matches!(err, Error::TimedOut { .. }), "{err}");

        let codefiles = fixture.codefiles();
        assert_eq!(codefiles.len(), 1);
        assert!(!codefiles[0].exists());
    }

    /// Whether `pid` is alive and not a zombie.
    fn running(pid: libc::pid_t) -> bool {
        // SAFETY: signal 0 only checks that the process exists.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
            stat.rsplit(')')
                .next()
                .map_or(true, |state| !state.trim_start().starts_with('Z'))
        })
    }

    #[tokio::test]
    async fn timeout_kills_the_backend_too() {
        let fixture = Fixture::new(
            "sh -c 'sleep 30' &\necho $! > \"$(dirname \"$out\")/backend.pid\"\nwait\n",
        );
        install(fixture.root(), "revm/target/release/revme");

        let err = fixture
            .invoker()
            .with_timeout(Some(Duration::from_millis(500)))
            .invoke(BackendId::Revm, &definition(&[]), 1, 0)
            .await
            .expect_err("times out");
        assert!(matches!(err, Error::TimedOut { .. }), "{err}");

        let pid: libc::pid_t = fs::read_to_string(fixture.root().join("results/backend.pid"))
            .expect("backend pid")
            .trim()
            .parse()
            .expect("numeric pid");
        let mut alive = running(pid);
        for _ in 0..40 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            alive = running(pid);
        }
        assert!(!alive, "backend {pid} outlived its cell");
    }

    #[tokio::test]
    async fn interrupt_stops_the_matrix() {
        let fixture = Fixture::new("kill -INT $PPID\nexec sleep 5\n");
        install(fixture.root(), "revm/target/release/revme");
        let mut other = definition(&[]);
        other.name = "other".to_string();

        let result = run_matrix(
            &fixture.invoker(),
            &[definition(&[]), other],
            &[BackendId::Revm],
            10,
            3,
        )
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(fixture.invocations().len(), 1);
        let codefiles = fixture.codefiles();
        assert_eq!(codefiles.len(), 1);
        assert!(!codefiles[0].exists());
    }

    #[tokio::test]
    async fn matrix_runs_repeated_benchmark_names_once() {
        let fixture = Fixture::new(SUCCEED);
        install(fixture.root(), "revm/target/release/revme");

        let matrix = run_matrix(
            &fixture.invoker(),
            &[definition(&[]), definition(&[0x01])],
            &[BackendId::Revm],
            2,
            0,
        )
        .await
        .expect("matrix");

        assert_eq!(matrix.len(), 1);
        assert_eq!(fixture.invocations().len(), 1);
        assert!(!fixture.invocations()[0].contains("--input"));
    }

    #[tokio::test]
    async fn matrix_records_unavailable_backend_and_keeps_going() {
        let fixture = Fixture::new(SUCCEED);
        install(fixture.root(), "revm/target/release/revme");
        let mut other = definition(&[]);
        other.name = "other".to_string();
        let definitions = [definition(&[]), other];

        let matrix = run_matrix(
            &fixture.invoker(),
            &definitions,
            &[BackendId::Revm, BackendId::Guillotine, BackendId::Revm],
            10,
            3,
        )
        .await
        .expect("matrix");

        assert_eq!(matrix.len(), 4);
        for name in ["sample", "other"] {
            let timing = matrix
                .get(BackendId::Revm, name)
                .and_then(Outcome::timing)
                .expect("revm timing");
            assert_eq!(timing.times.len(), 10);

            let failure = matrix
                .get(BackendId::Guillotine, name)
                .and_then(Outcome::failure)
                .expect("guillotine failure");
            assert!(failure.message.starts_with("BackendUnavailable: "));
            assert_eq!(failure.exit_code, None);
        }
        assert_eq!(fixture.invocations().len(), 2);
    }

    #[tokio::test]
    async fn empty_request_gives_empty_matrix() {
        let fixture = Fixture::new(SUCCEED);
        let matrix = run_matrix(&fixture.invoker(), &[], &BackendId::ALL, 10, 3)
            .await
            .expect("matrix");
        assert!(matrix.is_empty());
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }
}
