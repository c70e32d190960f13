//! Health command handler

use hallar::{AdmissionPolicy, RecognitionStatistics};

use super::session::load_config;
use crate::commands::HealthArgs;
use crate::error::{CliError, CliResult};
use crate::output::{render_violations, Printer};

/// Admission policy from the config file and flag overrides
pub fn effective_policy(args: &HealthArgs) -> CliResult<AdmissionPolicy> {
    let mut policy = match &args.config {
        Some(path) => load_config(Some(path))?.admission,
        None => AdmissionPolicy::default(),
    };
    if let Some(max) = args.max_consecutive {
        policy.max_consecutive_fallbacks = max;
    }
    if let Some(ratio) = args.max_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CliError::invalid_argument(format!(
                "--max-ratio must be within [0, 1], got {ratio}"
            )));
        }
        policy.max_fallback_ratio = ratio;
    }
    Ok(policy)
}

/// Execute the health command
pub fn execute_health(args: &HealthArgs, printer: Printer) -> CliResult<()> {
    let policy = effective_policy(args)?;
    let stats = RecognitionStatistics::load(&args.file)?;
    let violations = policy.violations(&stats);
    if violations.is_empty() {
        printer.success(&format!(
            "healthy: {} request(s), {} fallback resolution(s)",
            stats.total_requests, stats.coordinate_hits
        ));
        Ok(())
    } else {
        let message = render_violations(&violations);
        printer.failure(&message);
        Err(CliError::unhealthy(message))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> HealthArgs {
        HealthArgs {
            file: PathBuf::from("stats.json"),
            config: None,
            max_consecutive: None,
            max_ratio: None,
        }
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(effective_policy(&args()).unwrap(), AdmissionPolicy::default());
    }

    #[test]
    fn test_flag_overrides() {
        let policy = effective_policy(&HealthArgs {
            max_consecutive: Some(5),
            max_ratio: Some(0.2),
            ..args()
        })
        .unwrap();
        assert_eq!(policy.max_consecutive_fallbacks, 5);
        assert!((policy.max_fallback_ratio - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ratio_out_of_range() {
        assert!(effective_policy(&HealthArgs {
            max_ratio: Some(1.5),
            ..args()
        })
        .is_err());
    }
}
