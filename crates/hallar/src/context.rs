//! Per-session recognition state.
//!
//! A [`RecognitionContext`] owns everything that outlives a single request:
//! registered backends (with their lazily built engines), statistics, the
//! last click point and an optional reporter. Contexts are independent of
//! each other; create one per automation session.

use std::collections::BTreeMap;

use crate::geometry::Point;
use crate::matcher::{Backend, Recognizer};
use crate::report::Reporter;
use crate::stats::RecognitionStatistics;

/// Session state shared by every request of one automation run.
#[derive(Default)]
pub struct RecognitionContext {
    stats: RecognitionStatistics,
    recognizers: BTreeMap<Backend, Box<dyn Recognizer>>,
    last_click: Option<Point>,
    reporter: Option<Box<dyn Reporter>>,
}

impl std::fmt::Debug for RecognitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionContext")
            .field("stats", &self.stats)
            .field("backends", &self.recognizers.keys().collect::<Vec<_>>())
            .field("last_click", &self.last_click)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl RecognitionContext {
    /// Empty context with no backends
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context resuming from persisted statistics
    #[must_use]
    pub fn with_statistics(stats: RecognitionStatistics) -> Self {
        Self {
            stats,
            ..Self::default()
        }
    }

    /// Register a backend, replacing any previous one of the same kind
    pub fn register(&mut self, recognizer: Box<dyn Recognizer>) {
        let backend = recognizer.backend();
        if self.recognizers.insert(backend, recognizer).is_some() {
            tracing::debug!(%backend, "backend replaced");
        }
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.register(recognizer);
        self
    }

    /// Attach a reporter
    pub fn set_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporter = Some(reporter);
    }

    /// Builder form of [`set_reporter`](Self::set_reporter)
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.set_reporter(reporter);
        self
    }

    /// Registered backends in priority-independent order
    #[must_use]
    pub fn backends(&self) -> Vec<Backend> {
        self.recognizers.keys().copied().collect()
    }

    /// Whether a backend is registered and not known to be unusable
    #[must_use]
    pub fn is_available(&self, backend: Backend) -> bool {
        self.recognizers
            .get(&backend)
            .is_some_and(|r| r.is_available())
    }

    /// Whether a vision backend can be queried
    #[must_use]
    pub fn vision_ready(&self) -> bool {
        self.is_available(Backend::Vision)
    }

    /// Mutable access to a registered backend
    pub fn recognizer_mut(&mut self, backend: Backend) -> Option<&mut Box<dyn Recognizer>> {
        self.recognizers.get_mut(&backend)
    }

    /// Statistics so far
    #[must_use]
    pub const fn stats(&self) -> &RecognitionStatistics {
        &self.stats
    }

    /// Mutable statistics
    pub fn stats_mut(&mut self) -> &mut RecognitionStatistics {
        &mut self.stats
    }

    /// Most recent click, in logical screen pixels
    #[must_use]
    pub const fn last_click(&self) -> Option<Point> {
        self.last_click
    }

    /// Remember a click for last-click-relative fallbacks
    pub fn set_last_click(&mut self, point: Point) {
        self.last_click = Some(point);
    }

    /// Attached reporter, if any
    pub fn reporter_mut(&mut self) -> Option<&mut dyn Reporter> {
        self.reporter
            .as_mut()
            .map(|r| &mut **r as &mut dyn Reporter)
    }

    /// Clear statistics and the last click; backends stay registered
    pub fn reset(&mut self) {
        self.stats.reset();
        self.last_click = None;
    }

    /// Release every backend's engine handles
    pub fn teardown(&mut self) {
        for (backend, recognizer) in &mut self.recognizers {
            tracing::debug!(%backend, "backend teardown");
            recognizer.teardown();
        }
        self.last_click = None;
    }
}
