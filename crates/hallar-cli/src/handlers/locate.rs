//! Locate and verify command handlers

use serde::Serialize;

use hallar::{Outcome, ResolvedAction};

use super::session::{build_request, Session};
use crate::commands::{LocateArgs, VerifyArgs};
use crate::error::{CliError, CliResult};
use crate::output::Printer;

/// Machine-readable locate result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocateReport {
    /// Asset id or label
    pub target: String,
    /// Whether a point was produced
    pub resolved: bool,
    /// Backend that produced it
    pub backend: Option<String>,
    /// Click point x, logical pixels
    pub x: Option<f64>,
    /// Click point y, logical pixels
    pub y: Option<f64>,
    /// Backend confidence
    pub confidence: Option<f64>,
    /// Whether the fallback coordinate was used
    pub fallback: bool,
    /// Backend attempts made
    pub attempts: usize,
    /// Wall-clock time
    pub elapsed_ms: u64,
    /// Pointer action sent
    pub action: Option<ResolvedAction>,
    /// Why nothing was found
    pub failure: Option<String>,
}

impl LocateReport {
    /// Summarize an outcome
    #[must_use]
    pub fn new(target: &str, outcome: &Outcome) -> Self {
        Self {
            target: target.to_string(),
            resolved: outcome.is_resolved(),
            backend: outcome.backend.map(|b| b.name().to_string()),
            x: outcome.point.map(|p| p.x),
            y: outcome.point.map(|p| p.y),
            confidence: outcome.detection.as_ref().map(|d| d.confidence),
            fallback: outcome.used_fallback(),
            attempts: outcome.attempts.len(),
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            action: outcome.action,
            failure: outcome.failure.as_ref().map(ToString::to_string),
        }
    }

    fn summary(&self) -> String {
        match (self.backend.as_deref(), self.x, self.y) {
            (Some(backend), Some(x), Some(y)) => format!(
                "{} at ({x:.0}, {y:.0}) via {backend} in {}ms",
                self.target, self.elapsed_ms
            ),
            _ => format!(
                "{} not found after {} attempt(s) in {}ms: {}",
                self.target,
                self.attempts,
                self.elapsed_ms,
                self.failure.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

/// Execute the locate command
pub fn execute_locate(args: &LocateArgs, printer: Printer) -> CliResult<()> {
    let mut session = Session::open(&args.session, args.dry_run)?;
    let mut builder = build_request(&session.config, &args.target)?;
    if let Some(click) = args.click {
        builder = builder.action(click.into());
    }
    if let Some((dx, dy)) = args.offset {
        builder = builder.offset(dx, dy);
    }
    let request = builder.build()?;

    let result = session.orchestrator.run(&mut session.ctx, &request);
    session.save_stats()?;
    let outcome = result?;
    let report = LocateReport::new(request.target(), &outcome);

    if args.json {
        printer.data(&serde_json::to_string_pretty(&report)?);
    } else if report.resolved && report.fallback {
        printer.line(&format!("{} (fallback coordinate)", report.summary()));
    } else if report.resolved {
        printer.success(&report.summary());
    } else {
        printer.failure(&report.summary());
    }

    if report.resolved {
        Ok(())
    } else {
        Err(CliError::not_found(request.target()))
    }
}

/// Execute the verify command
pub fn execute_verify(args: &VerifyArgs, printer: Printer) -> CliResult<()> {
    if args.target.asset.is_none() && args.target.label.is_none() {
        return Err(CliError::invalid_argument(
            "verify needs --asset or --label",
        ));
    }
    let mut session = Session::open(&args.session, true)?;
    let request = build_request(&session.config, &args.target)?.build()?;

    let result = session
        .orchestrator
        .verify_exists(&mut session.ctx, &request, args.strict);
    session.save_stats()?;

    if result? {
        printer.success(&format!("{} is present", request.target()));
    } else {
        printer.failure(&format!("{} is absent", request.target()));
    }
    Ok(())
}
