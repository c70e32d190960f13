//! Session setup shared by locate and verify

use std::path::{Path, PathBuf};

use hallar::request::RecognitionRequestBuilder;
use hallar::{
    DryRunPointer, HallarConfig, InteractionExecutor, RecognitionContext, SearchRegion,
    StaticScreen, StaticWindows, StrategyOrchestrator,
};

use crate::commands::{SessionArgs, TargetArgs};
use crate::error::CliResult;

/// Load a configuration file (or the defaults) and apply environment overrides
pub fn load_config(path: Option<&Path>) -> CliResult<HallarConfig> {
    let config = match path {
        Some(path) => HallarConfig::load(path)?,
        None => HallarConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

/// Request builder for the target options, on top of the configured defaults
pub fn build_request(
    config: &HallarConfig,
    target: &TargetArgs,
) -> CliResult<RecognitionRequestBuilder> {
    let mut builder = config.request();
    if let Some(asset) = &target.asset {
        builder = builder.asset(asset);
    }
    if let Some(label) = &target.label {
        builder = builder.label(label);
    }
    if let Some((x, y)) = target.fallback {
        builder = builder.fallback(x, y, target.anchor.into());
    }
    if let Some(strategy) = target.strategy {
        builder = builder.strategy(strategy.into());
    }
    if let Some(timeout_ms) = target.timeout_ms {
        builder = builder.timeout(std::time::Duration::from_millis(timeout_ms));
    }
    if let Some((left, top, width, height)) = target.region {
        builder = builder.region(SearchRegion::new(left, top, width, height)?);
    }
    if let Some(confidence) = target.confidence {
        builder = builder.template_confidence(confidence);
    }
    Ok(builder)
}

/// Everything one command invocation drives
#[derive(Debug)]
pub struct Session {
    /// Effective configuration
    pub config: HallarConfig,
    /// Backends and statistics
    pub ctx: RecognitionContext,
    /// Polling state machine
    pub orchestrator: StrategyOrchestrator,
}

impl Session {
    /// Build a session from command-line options.
    ///
    /// `--screenshot` replays against a still image and never sends pointer
    /// events.
    pub fn open(args: &SessionArgs, dry_run: bool) -> CliResult<Self> {
        let mut config = load_config(args.config.as_deref())?;
        if let Some(stats) = &args.stats {
            config.statistics.path = Some(stats.clone());
        }
        if let Some(dir) = &args.evidence {
            config.report.screenshot_dir = Some(dir.clone());
        }
        let mut ctx = config.build_context()?;

        let orchestrator = match &args.screenshot {
            Some(path) => replay(&config, &mut ctx, path)?,
            None => live(&config, &mut ctx, dry_run)?,
        };
        Ok(Self {
            config,
            ctx,
            orchestrator,
        })
    }

    /// Statistics file, when one is configured
    #[must_use]
    pub fn stats_path(&self) -> Option<&PathBuf> {
        self.config.statistics.path.as_ref()
    }

    /// Persist statistics, when a file is configured
    pub fn save_stats(&self) -> CliResult<()> {
        if let Some(path) = self.stats_path() {
            self.ctx.stats().save(path)?;
            tracing::debug!(path = %path.display(), "statistics saved");
        }
        Ok(())
    }
}

fn replay(
    config: &HallarConfig,
    ctx: &mut RecognitionContext,
    path: &Path,
) -> CliResult<StrategyOrchestrator> {
    let screen = StaticScreen::from_file(path)?;
    let bounds = screen.bounds()?;
    let title = config
        .window
        .titles
        .first()
        .cloned()
        .unwrap_or_else(|| "screenshot".to_string());
    if let Some(reporter) = config.screenshot_reporter(Box::new(screen.clone()))? {
        ctx.set_reporter(Box::new(reporter));
    }
    tracing::info!(path = %path.display(), %bounds, "replaying screenshot");

    let executor =
        InteractionExecutor::new(Box::new(DryRunPointer::with_space(config.pointer.space)));
    Ok(config.build_orchestrator(
        Box::new(StaticWindows::covering(title, &bounds)),
        Box::new(screen),
        executor,
    ))
}

#[cfg(feature = "os")]
fn live(
    config: &HallarConfig,
    ctx: &mut RecognitionContext,
    dry_run: bool,
) -> CliResult<StrategyOrchestrator> {
    if let Some(reporter) = config.screenshot_reporter(Box::new(hallar::XcapScreen))? {
        ctx.set_reporter(Box::new(reporter));
    }
    Ok(config.live_orchestrator(dry_run)?)
}

#[cfg(not(feature = "os"))]
fn live(
    _config: &HallarConfig,
    _ctx: &mut RecognitionContext,
    _dry_run: bool,
) -> CliResult<StrategyOrchestrator> {
    Err(crate::error::CliError::config(
        "built without desktop support; pass --screenshot to replay an image",
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::{AnchorArg, StrategyArg};
    use hallar::{FallbackAnchor, Strategy};

    #[test]
    fn test_build_request_from_target_args() {
        let config = HallarConfig::default();
        let target = TargetArgs {
            asset: Some("save".to_string()),
            fallback: Some((0.5, 0.9)),
            anchor: AnchorArg::Bottom,
            strategy: Some(StrategyArg::ImageFirst),
            timeout_ms: Some(500),
            ..TargetArgs::default()
        };
        let request = build_request(&config, &target).unwrap().build().unwrap();
        assert_eq!(request.asset(), Some("save"));
        assert_eq!(request.fallback().unwrap().anchor, FallbackAnchor::WindowBottom);
        assert_eq!(request.strategy(), Strategy::ImageFirst);
        assert_eq!(request.timeout(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_build_request_rejects_bad_region() {
        let target = TargetArgs {
            label: Some("OK".to_string()),
            region: Some((0, 0, 0, 10)),
            ..TargetArgs::default()
        };
        assert!(build_request(&HallarConfig::default(), &target).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nope/hallar.yaml"))).is_err());
    }
}
