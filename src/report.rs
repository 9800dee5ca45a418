//! Progress and per-unit failure reporting.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::ConvertError;

/// Which unit of work a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitRef {
    /// A source image, identified by its display name.
    Item(String),
    /// A 1-based page number.
    Page(u32),
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRef::Item(name) => write!(f, "{}", name),
            UnitRef::Page(n) => write!(f, "page {}", n),
        }
    }
}

/// A unit that failed without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: UnitRef,
    pub message: String,
}

impl UnitFailure {
    pub fn new(unit: UnitRef, error: &ConvertError) -> Self {
        UnitFailure {
            unit,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.message)
    }
}

/// Receives progress and failures while an engine runs.
///
/// Both methods default to doing nothing, so callers only implement what they
/// render. `()` is the silent sink.
pub trait ProgressSink {
    /// Percentage in `0.0..=100.0`, never decreasing within one run.
    fn on_progress(&mut self, _percent: f64) {}

    fn on_unit_error(&mut self, _failure: &UnitFailure) {}
}

impl ProgressSink for () {}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn on_progress(&mut self, percent: f64) {
        (**self).on_progress(percent)
    }

    fn on_unit_error(&mut self, failure: &UnitFailure) {
        (**self).on_unit_error(failure)
    }
}

/// Thread-safe, append-only failure collection.
///
/// Clones share the same storage, so one log can be handed to several runs on
/// different threads and read back afterwards.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    inner: Arc<Mutex<Vec<UnitFailure>>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, failure: UnitFailure) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    pub fn snapshot(&self) -> Vec<UnitFailure> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for FailureLog {
    fn on_unit_error(&mut self, failure: &UnitFailure) {
        self.push(failure.clone());
    }
}

/// How a run that did not fail fatally ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Partial { failed: usize },
}

/// Summary returned by every engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Units attempted (images, or pages).
    pub total_units: usize,
    /// Units that produced output (pages written, or pages transformed).
    /// For extraction this counts files written.
    pub produced: usize,
    pub failures: Vec<UnitFailure>,
}

impl RunReport {
    pub fn outcome(&self) -> Outcome {
        if self.failures.is_empty() {
            Outcome::Complete
        } else {
            Outcome::Partial {
                failed: self.failures.len(),
            }
        }
    }
}

/// Drives a [`ProgressSink`] for one pass and folds unit results into a report.
pub(crate) struct Tracker<'a> {
    sink: &'a mut dyn ProgressSink,
    total: usize,
    last: f64,
    report: RunReport,
}

impl<'a> Tracker<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink, total: usize) -> Self {
        Tracker {
            sink,
            total,
            last: 0.0,
            report: RunReport {
                total_units: total,
                ..RunReport::default()
            },
        }
    }

    pub(crate) fn produced(&mut self, count: usize) {
        self.report.produced += count;
    }

    pub(crate) fn fail(&mut self, unit: UnitRef, error: &ConvertError) {
        tracing::warn!(%unit, %error, "unit failed");
        let failure = UnitFailure::new(unit, error);
        self.sink.on_unit_error(&failure);
        self.report.failures.push(failure);
    }

    /// Report that `done` of `total` units are finished.
    pub(crate) fn step(&mut self, done: usize) {
        let percent = if self.total == 0 {
            100.0
        } else {
            (done as f64 / self.total as f64 * 100.0).min(100.0)
        };
        let percent = percent.max(self.last);
        self.last = percent;
        self.sink.on_progress(percent);
    }

    pub(crate) fn finish(mut self) -> RunReport {
        if self.total == 0 || self.last < 100.0 {
            self.last = 100.0;
            self.sink.on_progress(100.0);
        }
        self.report
    }
}
