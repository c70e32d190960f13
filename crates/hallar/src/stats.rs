//! Recognition statistics and run admission.
//!
//! Every backend attempt and every request outcome is counted here. The
//! consecutive-fallback counter is the run-level health signal: a suite that
//! keeps clicking hardcoded coordinates is not testing recognition anymore.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::matcher::{Backend, RecognitionResult};
use crate::result::HallarResult;

/// Per-backend counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCounters {
    /// Attempts made
    pub attempts: u64,
    /// Attempts that produced a detection
    pub hits: u64,
    /// Sum of attempt latencies
    pub total_latency_ms: u64,
}

impl BackendCounters {
    /// Hits per attempt
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.hits as f64 / self.attempts as f64
        }
    }

    /// Mean attempt latency
    #[must_use]
    pub fn mean_latency_ms(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.attempts as f64
        }
    }
}

/// Per-target counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCounters {
    /// Requests for this target
    pub attempts: u64,
    /// Requests resolved by a recognition backend
    pub hits: u64,
    /// Requests resolved by the fallback coordinate
    pub fallback_hits: u64,
    /// Requests that failed
    pub failures: u64,
    /// Which backend resolved the request
    #[serde(default)]
    pub by_backend: BTreeMap<Backend, u64>,
}

/// Counters for one recognition context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionStatistics {
    /// Requests run
    pub total_requests: u64,
    /// Requests resolved (by a backend or the fallback)
    pub resolved: u64,
    /// Requests that failed
    pub failed: u64,
    /// Requests resolved by the fallback coordinate
    pub coordinate_hits: u64,
    /// Current run of back-to-back fallback resolutions
    pub consecutive_fallbacks: u64,
    /// Longest run of back-to-back fallback resolutions
    pub max_consecutive_fallbacks: u64,
    /// Per-backend counters
    pub backends: BTreeMap<Backend, BackendCounters>,
    /// Per-target counters
    pub assets: BTreeMap<String, AssetCounters>,
}

impl RecognitionStatistics {
    /// Empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one backend attempt
    pub fn record_attempt(&mut self, result: &RecognitionResult) {
        let counters = self.backends.entry(result.backend).or_default();
        counters.attempts += 1;
        if result.success() {
            counters.hits += 1;
        }
        counters.total_latency_ms += u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Count a request resolved by `backend`
    pub fn record_resolution(&mut self, target: &str, backend: Backend) {
        self.total_requests += 1;
        self.resolved += 1;
        let asset = self.assets.entry(target.to_string()).or_default();
        asset.attempts += 1;
        *asset.by_backend.entry(backend).or_default() += 1;

        if backend == Backend::Fallback {
            asset.fallback_hits += 1;
            self.coordinate_hits += 1;
            self.consecutive_fallbacks += 1;
            self.max_consecutive_fallbacks =
                self.max_consecutive_fallbacks.max(self.consecutive_fallbacks);
        } else {
            asset.hits += 1;
            self.consecutive_fallbacks = 0;
        }
    }

    /// Count a request that failed
    pub fn record_failure(&mut self, target: &str) {
        self.total_requests += 1;
        self.failed += 1;
        let asset = self.assets.entry(target.to_string()).or_default();
        asset.attempts += 1;
        asset.failures += 1;
    }

    /// Fallback resolutions per request
    #[must_use]
    pub fn fallback_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coordinate_hits as f64 / self.total_requests as f64
        }
    }

    /// Clear every counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> HallarResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read back a file written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> HallarResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load if the file exists, otherwise start empty
    pub fn load_or_default(path: impl AsRef<Path>) -> HallarResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Why a run is considered unhealthy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HealthViolation {
    /// Too many fallback resolutions in a row
    #[error("{count} consecutive fallback resolutions (limit {limit})")]
    ConsecutiveFallbacks {
        /// Peak run length
        count: u64,
        /// Configured limit
        limit: u64,
    },
    /// Too many fallback resolutions overall
    #[error("fallback ratio {ratio:.2} exceeds {limit:.2}")]
    FallbackRatio {
        /// Observed ratio
        ratio: f64,
        /// Configured limit
        limit: f64,
    },
}

/// Run-level health rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionPolicy {
    /// A run of this many consecutive fallbacks fails the run
    pub max_consecutive_fallbacks: u64,
    /// A fallback ratio above this fails the run
    pub max_fallback_ratio: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_fallbacks: 3,
            max_fallback_ratio: 0.5,
        }
    }
}

impl AdmissionPolicy {
    /// Every rule the statistics break
    #[must_use]
    pub fn violations(&self, stats: &RecognitionStatistics) -> Vec<HealthViolation> {
        let mut violations = Vec::new();
        if self.max_consecutive_fallbacks > 0
            && stats.max_consecutive_fallbacks >= self.max_consecutive_fallbacks
        {
            violations.push(HealthViolation::ConsecutiveFallbacks {
                count: stats.max_consecutive_fallbacks,
                limit: self.max_consecutive_fallbacks,
            });
        }
        let ratio = stats.fallback_ratio();
        if ratio > self.max_fallback_ratio {
            violations.push(HealthViolation::FallbackRatio {
                ratio,
                limit: self.max_fallback_ratio,
            });
        }
        violations
    }

    /// First broken rule, if any
    pub fn check(&self, stats: &RecognitionStatistics) -> Result<(), HealthViolation> {
        match self.violations(stats).into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::result::BackendFailure;
    use std::time::Duration;
    use tempfile::TempDir;

    fn attempt(backend: Backend, ok: bool, ms: u64) -> RecognitionResult {
        RecognitionResult {
            backend,
            elapsed: Duration::from_millis(ms),
            outcome: if ok {
                Ok(crate::matcher::Detection::center(
                    crate::geometry::Point::new(1.0, 1.0),
                    0.9,
                ))
            } else {
                Err(BackendFailure::no_match("nothing"))
            },
        }
    }

    #[test]
    fn test_attempt_counters() {
        let mut stats = RecognitionStatistics::new();
        stats.record_attempt(&attempt(Backend::Vision, false, 120));
        stats.record_attempt(&attempt(Backend::Template, true, 30));
        stats.record_attempt(&attempt(Backend::Template, false, 10));

        let template = stats.backends[&Backend::Template];
        assert_eq!(template.attempts, 2);
        assert_eq!(template.hits, 1);
        assert_eq!(template.total_latency_ms, 40);
        assert_eq!(template.mean_latency_ms(), 20.0);
        assert_eq!(template.hit_rate(), 0.5);
        assert_eq!(stats.backends[&Backend::Vision].hits, 0);
    }

    #[test]
    fn test_consecutive_fallbacks_reset_on_recognition() {
        let mut stats = RecognitionStatistics::new();
        stats.record_resolution("a", Backend::Fallback);
        stats.record_resolution("b", Backend::Fallback);
        assert_eq!(stats.consecutive_fallbacks, 2);
        stats.record_resolution("c", Backend::Ocr);
        assert_eq!(stats.consecutive_fallbacks, 0);
        assert_eq!(stats.max_consecutive_fallbacks, 2);
        assert_eq!(stats.coordinate_hits, 2);
        stats.record_failure("d");
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.resolved, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.assets["c"].by_backend[&Backend::Ocr], 1);
        assert_eq!(stats.assets["a"].fallback_hits, 1);
        assert_eq!(stats.assets["d"].failures, 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/stats.json");
        let mut stats = RecognitionStatistics::new();
        stats.record_attempt(&attempt(Backend::LegacyTemplate, true, 7));
        stats.record_resolution("login", Backend::LegacyTemplate);
        stats.record_resolution("logout", Backend::Fallback);
        stats.save(&path).unwrap();

        let loaded = RecognitionStatistics::load(&path).unwrap();
        assert_eq!(loaded, stats);

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"legacy_template\""));
        assert!(json.contains("\"coordinate_hits\": 1"));
    }

    #[test]
    fn test_load_or_default_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut stats = RecognitionStatistics::load_or_default(dir.path().join("none.json")).unwrap();
        assert_eq!(stats, RecognitionStatistics::default());
        stats.record_failure("x");
        stats.reset();
        assert_eq!(stats.total_requests, 0);
        assert!(stats.assets.is_empty());
    }

    mod admission_tests {
        use super::*;

        #[test]
        fn test_three_consecutive_fallbacks_fail_the_run() {
            let mut stats = RecognitionStatistics::new();
            for _ in 0..7 {
                stats.record_resolution("ok", Backend::Template);
            }
            for target in ["a", "b", "c"] {
                stats.record_resolution(target, Backend::Fallback);
            }
            let policy = AdmissionPolicy::default();
            assert_eq!(
                policy.check(&stats),
                Err(HealthViolation::ConsecutiveFallbacks { count: 3, limit: 3 })
            );
        }

        #[test]
        fn test_ratio_above_half_fails() {
            let mut stats = RecognitionStatistics::new();
            for backend in [Backend::Fallback, Backend::Ocr, Backend::Fallback] {
                stats.record_resolution("x", backend);
            }
            let violations = AdmissionPolicy::default().violations(&stats);
            assert_eq!(violations.len(), 1);
            assert!(matches!(violations[0], HealthViolation::FallbackRatio { .. }));
        }

        #[test]
        fn test_exactly_half_passes() {
            let mut stats = RecognitionStatistics::new();
            for backend in [Backend::Fallback, Backend::Ocr, Backend::Fallback, Backend::Vision] {
                stats.record_resolution("x", backend);
            }
            assert!(AdmissionPolicy::default().check(&stats).is_ok());
            assert!(AdmissionPolicy::default()
                .check(&RecognitionStatistics::new())
                .is_ok());
        }
    }
}
