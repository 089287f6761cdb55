//! Timing results, their on-disk format, and the benchmark matrix.
//!
//! The timing tool exports one JSON file per invocation:
//!
//! ```json
//! { "results": [ { "mean": 0.002, "stddev": 0.0001, "min": 0.0018, "max": 0.0023, "times": [0.002, ...] } ] }
//! ```
//!
//! All values are seconds. [`parse`] turns such a file into a [`TimingResult`]; a [`MatrixResult`] serializes every
//! cell back into the same shape, or into `{ "error": ... }` for failed cells.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{runners::BackendId, Error, Result};

/// Slack allowed when checking `min <= mean <= max` on float seconds, to absorb summation rounding.
const ORDER_TOLERANCE_SECS: f64 = 1e-9;

mod seconds {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }

    pub mod vec {
        use std::time::Duration;

        use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            durations: &[Duration],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(durations.len()))?;
            for duration in durations {
                seq.serialize_element(&duration.as_secs_f64())?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Duration>, D::Error> {
            Vec::<f64>::deserialize(deserializer)?
                .into_iter()
                .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
                .collect()
        }
    }
}

/// Aggregate statistics of one timed benchmark on one backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingResult {
    /// Mean run time.
    #[serde(with = "seconds")]
    pub mean: Duration,
    /// Standard deviation of the run times.
    #[serde(with = "seconds")]
    pub stddev: Duration,
    /// Fastest run.
    #[serde(with = "seconds")]
    pub min: Duration,
    /// Slowest run.
    #[serde(with = "seconds")]
    pub max: Duration,
    /// Every run time, in execution order.
    #[serde(with = "seconds::vec")]
    pub times: Vec<Duration>,
}

impl TimingResult {
    /// Builds a result from float seconds, as the timing tool reports them.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if any value is negative or not finite, or if `min <= mean <= max` does
    /// not hold.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use evm_bench::TimingResult;
    ///
    /// let result = TimingResult::from_secs(0.002, 0.0001, 0.0018, 0.0023, &[0.0018, 0.0023]).unwrap();
    /// assert_eq!(result.mean, Duration::from_millis(2));
    ///
    /// assert!(TimingResult::from_secs(0.5, 0.0, 0.6, 0.7, &[]).is_err());
    /// ```
    pub fn from_secs(
        mean: f64,
        stddev: f64,
        min: f64,
        max: f64,
        times: &[f64],
    ) -> std::result::Result<Self, String> {
        let duration = |name: &str, secs: f64| {
            Duration::try_from_secs_f64(secs).map_err(|err| format!("bad {name} {secs}: {err}"))
        };

        if min > max || min > mean + ORDER_TOLERANCE_SECS || mean > max + ORDER_TOLERANCE_SECS {
            return Err(format!(
                "expected min <= mean <= max, got min={min} mean={mean} max={max}"
            ));
        }

        let min = duration("min", min)?;
        let max = duration("max", max)?;
        let mean = duration("mean", mean)?.clamp(min, max);
        Ok(Self {
            mean,
            stddev: duration("stddev", stddev)?,
            min,
            max,
            times: times
                .iter()
                .map(|&secs| duration("sample", secs))
                .collect::<std::result::Result<_, _>>()?,
        })
    }
}

#[derive(Deserialize)]
struct Export {
    results: Vec<Measurement>,
}

#[derive(Deserialize)]
struct Measurement {
    mean: f64,
    // `null` when only a single run was made.
    stddev: Option<f64>,
    min: f64,
    max: f64,
    times: Vec<f64>,
}

/// Loads the timing tool's export file at `path`.
///
/// # Errors
///
/// [`Error::MalformedResult`] if the file is missing, is not valid JSON of the expected shape, has no measurement
/// entry, or carries invalid statistics.
pub fn parse(path: &Path) -> Result<TimingResult> {
    log::trace!("parsing result file {}", path.display());
    let text = fs::read_to_string(path)
        .map_err(|err| Error::malformed(path, format!("could not read: {err}")))?;
    let export: Export = serde_json::from_str(&text)
        .map_err(|err| Error::malformed(path, format!("could not deserialize: {err}")))?;
    let measurement = export
        .results
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed(path, "no measurement entry"))?;

    TimingResult::from_secs(
        measurement.mean,
        measurement.stddev.unwrap_or_default(),
        measurement.min,
        measurement.max,
        &measurement.times,
    )
    .map_err(|reason| Error::malformed(path, reason))
}

/// A failed matrix cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// What went wrong, prefixed with the error kind.
    #[serde(rename = "error")]
    pub message: String,
    /// Exit code of the timing tool, when it ran and failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Self {
            message: format!("{}: {err}", err.kind()),
            exit_code: err.exit_code(),
        }
    }
}

/// Outcome of one matrix cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OutcomeRepr", into = "OutcomeRepr")]
pub enum Outcome {
    /// The benchmark ran and was timed.
    Success(TimingResult),
    /// The cell failed; the rest of the matrix was unaffected.
    Failure(Failure),
}

impl Outcome {
    /// The timing result, if the cell succeeded.
    #[must_use]
    pub fn timing(&self) -> Option<&TimingResult> {
        match self {
            Self::Success(timing) => Some(timing),
            Self::Failure(_) => None,
        }
    }

    /// The failure, if the cell failed.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OutcomeRepr {
    Success { results: [TimingResult; 1] },
    Failure(Failure),
}

impl From<OutcomeRepr> for Outcome {
    fn from(repr: OutcomeRepr) -> Self {
        match repr {
            OutcomeRepr::Success { results: [timing] } => Self::Success(timing),
            OutcomeRepr::Failure(failure) => Self::Failure(failure),
        }
    }
}

impl From<Outcome> for OutcomeRepr {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success(timing) => Self::Success { results: [timing] },
            Outcome::Failure(failure) => Self::Failure(failure),
        }
    }
}

/// Every cell of a matrix run, keyed by backend then benchmark name.
///
/// Serializes as the matrix report: `{ "<backend>": { "<benchmark>": { "results": [...] } | { "error": ... } } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatrixResult {
    cells: BTreeMap<BackendId, BTreeMap<String, Outcome>>,
}

impl MatrixResult {
    pub(crate) fn insert(&mut self, backend: BackendId, benchmark: &str, outcome: Outcome) {
        if self
            .cells
            .entry(backend)
            .or_default()
            .insert(benchmark.to_string(), outcome)
            .is_some()
        {
            log::warn!("[{backend}/{benchmark}] cell recorded twice, keeping the latest");
        }
    }

    /// Outcome of a single cell.
    #[must_use]
    pub fn get(&self, backend: BackendId, benchmark: &str) -> Option<&Outcome> {
        self.cells.get(&backend)?.get(benchmark)
    }

    /// Iterates over every cell, ordered by backend then benchmark name.
    pub fn iter(&self) -> impl Iterator<Item = (BackendId, &str, &Outcome)> {
        self.cells.iter().flat_map(|(backend, row)| {
            row.iter()
                .map(move |(benchmark, outcome)| (*backend, benchmark.as_str(), outcome))
        })
    }

    /// Failed cells only.
    pub fn failures(&self) -> impl Iterator<Item = (BackendId, &str, &Failure)> {
        self.iter()
            .filter_map(|(backend, benchmark, outcome)| Some((backend, benchmark, outcome.failure()?)))
    }

    /// Backends that have at least one cell.
    pub fn backends(&self) -> impl Iterator<Item = BackendId> + '_ {
        self.cells.keys().copied()
    }

    /// Total number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    /// Whether the matrix has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the matrix report to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be written.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("could not create report directory", err))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| Error::io("could not serialize report", err.into()))?;
        fs::write(path, json).map_err(|err| {
            Error::io(format!("could not write report {}", path.display()), err)
        })?;
        log::info!("wrote matrix report to {}", path.display());
        Ok(())
    }
}
