//! Transmission sinks (spec §6.3, §6.4).
//!
//! `Engine::ingest` only ever returns `Published` records; it never performs
//! I/O itself (design notes §9: "a reimplementation should encapsulate all
//! of it in a single engine value" — the same argument applies to output).
//! A `Sink` is where a caller decides what "transmitted" means.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::KanonError;
use crate::types::Published;

/// Somewhere a published record can be transmitted to.
///
/// `delay` is the time between the record's arrival and its publication,
/// known only to callers who tracked arrival instants themselves (the CLI,
/// in experiment mode); sinks that don't care about latency ignore it.
pub trait Sink {
    fn transmit(&mut self, published: &Published, delay: Option<Duration>) -> Result<(), KanonError>;
}

/// Writes a `Transmitted : [...]` line to stdout, matching the reference's
/// `print("Transmitted : ", rawstring)`.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn transmit(&mut self, published: &Published, _delay: Option<Duration>) -> Result<(), KanonError> {
        println!("Transmitted : {:?}", published.fields);
        Ok(())
    }
}

/// Wraps an inner sink and additionally appends every published record to
/// `output_tuple.txt` and its arrival-to-publication delay (in seconds) to
/// `output_delay.txt`, both append-only (spec §6.4). Used only when the CLI
/// is run with `--experiment`.
#[derive(Debug)]
pub struct ExperimentSink<S: Sink> {
    inner: S,
    tuple_log: PathBuf,
    delay_log: PathBuf,
}

impl<S: Sink> ExperimentSink<S> {
    /// `dir` is the directory the two log files are created/appended in,
    /// matching the reference's convention of writing them alongside the
    /// working directory it runs from.
    pub fn new(inner: S, dir: impl AsRef<Path>) -> Self {
        ExperimentSink {
            inner,
            tuple_log: dir.as_ref().join("output_tuple.txt"),
            delay_log: dir.as_ref().join("output_delay.txt"),
        }
    }

    fn append_line(path: &Path, line: &str) -> Result<(), KanonError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| KanonError::InternalInvariant(format!("could not open {path:?}: {e}")))?;
        writeln!(f, "{line}")
            .map_err(|e| KanonError::InternalInvariant(format!("could not write {path:?}: {e}")))
    }
}

impl<S: Sink> Sink for ExperimentSink<S> {
    fn transmit(&mut self, published: &Published, delay: Option<Duration>) -> Result<(), KanonError> {
        self.inner.transmit(published, delay)?;

        // kanon-dfr reads this file back with serde_json, so the logged
        // line must be valid JSON, not Rust's `{:?}` debug form (spec §6.6:
        // "a list literal per line").
        let line = serde_json::to_string(&published.fields).map_err(|e| {
            KanonError::InternalInvariant(format!("could not serialize published record: {e}"))
        })?;
        Self::append_line(&self.tuple_log, &line)?;

        let delay = delay.ok_or_else(|| {
            KanonError::InternalInvariant(
                "experiment mode requires an arrival delay for every published record".into(),
            )
        })?;
        Self::append_line(&self.delay_log, &format!("{}", delay.as_secs_f64()))
    }
}
