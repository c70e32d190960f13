//! Terminal output

use console::style;
use std::fmt::Write as _;

use hallar::{HealthViolation, RecognitionStatistics};

/// Writes human-readable results to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer {
    quiet: bool,
}

impl Printer {
    /// Printer honouring quiet mode
    #[must_use]
    pub const fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Plain line
    pub fn line(&self, text: &str) {
        if !self.quiet {
            println!("{text}");
        }
    }

    /// Positive result
    pub fn success(&self, text: &str) {
        if !self.quiet {
            println!("{} {text}", style("✓").green().bold());
        }
    }

    /// Negative result; printed even in quiet mode
    pub fn failure(&self, text: &str) {
        println!("{} {text}", style("✗").red().bold());
    }

    /// Data meant for other programs; printed even in quiet mode
    pub fn data(&self, text: &str) {
        println!("{text}");
    }
}

/// Statistics as an aligned text report
#[must_use]
pub fn render_stats(stats: &RecognitionStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Requests:              {}", stats.total_requests);
    let _ = writeln!(out, "Resolved:              {}", stats.resolved);
    let _ = writeln!(out, "Failed:                {}", stats.failed);
    let _ = writeln!(
        out,
        "Fallback resolutions:  {} ({:.0}%)",
        stats.coordinate_hits,
        stats.fallback_ratio() * 100.0
    );
    let _ = writeln!(
        out,
        "Consecutive fallbacks: {} (peak {})",
        stats.consecutive_fallbacks, stats.max_consecutive_fallbacks
    );

    if !stats.backends.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<16} {:>8} {:>8} {:>8} {:>12}",
            "backend", "attempts", "hits", "rate", "mean ms"
        );
        for (backend, counters) in &stats.backends {
            let _ = writeln!(
                out,
                "{:<16} {:>8} {:>8} {:>7.0}% {:>12.1}",
                backend.name(),
                counters.attempts,
                counters.hits,
                counters.hit_rate() * 100.0,
                counters.mean_latency_ms()
            );
        }
    }

    if !stats.assets.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<24} {:>8} {:>8} {:>9} {:>8}",
            "target", "requests", "hits", "fallback", "failed"
        );
        for (target, counters) in &stats.assets {
            let _ = writeln!(
                out,
                "{:<24} {:>8} {:>8} {:>9} {:>8}",
                target, counters.attempts, counters.hits, counters.fallback_hits, counters.failures
            );
        }
    }
    out
}

/// One line per violated rule
#[must_use]
pub fn render_violations(violations: &[HealthViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
