//! Configuration.
//!
//! `hallar.yaml` holds everything that stays fixed across requests: which
//! window to drive, where reference images live, which backends run and how
//! the VLM is reached. Every field has a default, so an empty file is a valid
//! configuration.
//!
//! ```yaml
//! window:
//!   titles: ["Inventory"]
//! assets:
//!   root: assets/
//! vision:
//!   enabled: true
//!   model: qwen2.5vl:7b
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::ScreenCapture;
use crate::context::RecognitionContext;
use crate::geometry::Size;
use crate::interaction::{InteractionExecutor, PointerSpace};
use crate::matcher::{TemplateMatcher, TextMatcher, VisionQueryMatcher};
use crate::orchestrator::StrategyOrchestrator;
use crate::report::ScreenshotReporter;
use crate::request::{RecognitionRequest, RecognitionRequestBuilder};
use crate::result::{HallarError, HallarResult};
use crate::stats::{AdmissionPolicy, RecognitionStatistics};
use crate::strategy::Strategy;
use crate::transform::{CoordinateTransformer, DEFAULT_TOLERANCE_PX};
use crate::vlm::{VlmProtocol, VlmSettings};
use crate::window::{WindowLocator, WindowSource, DEFAULT_MIN_HEIGHT, DEFAULT_MIN_WIDTH};

/// Overrides the VLM protocol
pub const ENV_VLM_PROTOCOL: &str = "HALLAR_VLM_PROTOCOL";
/// Overrides the VLM base URL
pub const ENV_VLM_URL: &str = "HALLAR_VLM_URL";
/// Overrides the VLM model
pub const ENV_VLM_MODEL: &str = "HALLAR_VLM_MODEL";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HallarConfig {
    /// Target window selection
    pub window: WindowConfig,
    /// Reference image locations
    pub assets: AssetConfig,
    /// Polling and strategy defaults
    pub locator: LocatorConfig,
    /// OCR backend
    pub ocr: OcrConfig,
    /// VLM backend
    pub vision: VisionConfig,
    /// Pointer injection
    pub pointer: PointerConfig,
    /// Statistics persistence
    pub statistics: StatisticsConfig,
    /// Run-level health rules
    pub admission: AdmissionPolicy,
    /// Screenshot evidence
    pub report: ReportConfig,
}

/// Target window selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Title substrings, any of which selects a window; empty selects any
    pub titles: Vec<String>,
    /// Title substrings that disqualify a window
    pub exclude_titles: Vec<String>,
    /// Minimum usable width
    pub min_width: u32,
    /// Minimum usable height
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            titles: Vec::new(),
            exclude_titles: Vec::new(),
            min_width: DEFAULT_MIN_WIDTH,
            min_height: DEFAULT_MIN_HEIGHT,
        }
    }
}

/// Reference image locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Root for the multi-scale template backend
    pub root: PathBuf,
    /// Root for the legacy single-scale backend; disabled when unset
    pub legacy_root: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            legacy_root: None,
        }
    }
}

/// Polling and strategy defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Overall time budget per request
    pub timeout_ms: u64,
    /// Sleep between poll iterations
    pub poll_interval_ms: u64,
    /// Backend priority preset
    pub strategy: Strategy,
    /// Template backend threshold
    pub template_confidence: f64,
    /// Legacy template backend threshold
    pub legacy_confidence: f64,
    /// Out-of-region tolerance in logical pixels
    pub tolerance_px: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            poll_interval_ms: 150,
            strategy: Strategy::Default,
            template_confidence: crate::matcher::DEFAULT_TEMPLATE_CONFIDENCE,
            legacy_confidence: crate::matcher::DEFAULT_LEGACY_CONFIDENCE,
            tolerance_px: DEFAULT_TOLERANCE_PX,
        }
    }
}

/// OCR backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Register the backend
    pub enabled: bool,
    /// tesseract language code
    pub language: String,
    /// Spans must score strictly above this
    pub min_confidence: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "eng".to_string(),
            min_confidence: crate::matcher::text::DEFAULT_OCR_MIN_CONFIDENCE,
        }
    }
}

/// VLM backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Register the backend
    pub enabled: bool,
    /// Wire protocol
    pub protocol: VlmProtocol,
    /// Server base URL; protocol default when unset
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key; protocol default when unset
    pub api_key_env: Option<String>,
    /// Per-request HTTP timeout
    pub timeout_ms: u64,
    /// Generation limit
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f64,
    /// Replies must score at least this
    pub min_confidence: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let settings = VlmSettings::default();
        Self {
            enabled: false,
            protocol: settings.protocol,
            base_url: None,
            model: settings.model,
            api_key_env: None,
            timeout_ms: u64::try_from(settings.timeout.as_millis()).unwrap_or(30_000),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            min_confidence: crate::matcher::vision::DEFAULT_VLM_MIN_CONFIDENCE,
        }
    }
}

/// Pointer injection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    /// Coordinate space the OS expects
    pub space: PointerSpace,
}

/// Statistics persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// JSON file loaded on start and written on demand
    pub path: Option<PathBuf>,
}

/// Screenshot evidence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory for annotated screenshots; disabled when unset
    pub screenshot_dir: Option<PathBuf>,
}

impl HallarConfig {
    /// Load a YAML file
    pub fn load(path: impl AsRef<Path>) -> HallarResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            HallarError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(yaml: &str) -> HallarResult<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> HallarResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Apply `HALLAR_VLM_*` overrides from the process environment
    pub fn with_env_overrides(self) -> HallarResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `HALLAR_VLM_*` overrides from a lookup function
    pub fn with_overrides<F>(mut self, lookup: F) -> HallarResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(protocol) = present(ENV_VLM_PROTOCOL) {
            self.vision.protocol = protocol.parse::<VlmProtocol>().map_err(|e| {
                HallarError::config(format!("{ENV_VLM_PROTOCOL}: {e}"))
            })?;
        }
        if let Some(url) = present(ENV_VLM_URL) {
            self.vision.base_url = Some(url);
        }
        if let Some(model) = present(ENV_VLM_MODEL) {
            self.vision.model = model;
        }
        Ok(self)
    }

    /// Reject values no backend can work with
    pub fn validate(&self) -> HallarResult<()> {
        let unit = [
            ("locator.template_confidence", self.locator.template_confidence),
            ("locator.legacy_confidence", self.locator.legacy_confidence),
            ("ocr.min_confidence", self.ocr.min_confidence),
            ("vision.min_confidence", self.vision.min_confidence),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(HallarError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.locator.timeout_ms == 0 {
            return Err(HallarError::config("locator.timeout_ms must be positive"));
        }
        if self.locator.poll_interval_ms == 0 {
            return Err(HallarError::config("locator.poll_interval_ms must be positive"));
        }
        if !self.locator.tolerance_px.is_finite() || self.locator.tolerance_px < 0.0 {
            return Err(HallarError::config("locator.tolerance_px must be non-negative"));
        }
        Ok(())
    }

    /// Transformer with the configured tolerance
    #[must_use]
    pub const fn transformer(&self) -> CoordinateTransformer {
        CoordinateTransformer::new(self.locator.tolerance_px)
    }

    /// Window selection rules
    #[must_use]
    pub fn window_locator(&self) -> WindowLocator {
        WindowLocator::new(self.window.titles.iter().cloned())
            .with_exclusions(self.window.exclude_titles.iter().cloned())
            .with_min_size(Size::new(self.window.min_width, self.window.min_height))
    }

    /// VLM client settings
    #[must_use]
    pub fn vlm_settings(&self) -> VlmSettings {
        let protocol = self.vision.protocol;
        VlmSettings {
            protocol,
            base_url: self
                .vision
                .base_url
                .clone()
                .unwrap_or_else(|| protocol.default_base_url().to_string()),
            model: self.vision.model.clone(),
            api_key_env: self
                .vision
                .api_key_env
                .clone()
                .unwrap_or_else(|| protocol.default_api_key_env().to_string()),
            timeout: Duration::from_millis(self.vision.timeout_ms),
            max_tokens: self.vision.max_tokens,
            temperature: self.vision.temperature,
        }
    }

    /// Request builder preset with the configured timing and strategy
    #[must_use]
    pub fn request(&self) -> RecognitionRequestBuilder {
        RecognitionRequest::builder()
            .timeout(Duration::from_millis(self.locator.timeout_ms))
            .poll_interval(Duration::from_millis(self.locator.poll_interval_ms))
            .strategy(self.locator.strategy)
    }

    /// Context with every enabled backend registered.
    ///
    /// Statistics resume from `statistics.path` when the file exists.
    pub fn build_context(&self) -> HallarResult<RecognitionContext> {
        let stats = match &self.statistics.path {
            Some(path) => RecognitionStatistics::load_or_default(path)?,
            None => RecognitionStatistics::new(),
        };
        let transformer = self.transformer();
        let mut ctx = RecognitionContext::with_statistics(stats);

        ctx.register(Box::new(
            TemplateMatcher::new(&self.assets.root)
                .with_threshold(self.locator.template_confidence)
                .with_transformer(transformer),
        ));
        if let Some(legacy_root) = &self.assets.legacy_root {
            ctx.register(Box::new(
                TemplateMatcher::legacy(legacy_root, &self.assets.root)
                    .with_threshold(self.locator.legacy_confidence)
                    .with_transformer(transformer),
            ));
        }
        if self.ocr.enabled {
            ctx.register(Box::new(
                TextMatcher::tesseract(&self.ocr.language)
                    .with_min_confidence(self.ocr.min_confidence)
                    .with_transformer(transformer),
            ));
        }
        if self.vision.enabled {
            ctx.register(Box::new(
                VisionQueryMatcher::connect(self.vlm_settings())
                    .with_min_confidence(self.vision.min_confidence)
                    .with_transformer(transformer),
            ));
        }
        tracing::debug!(backends = ?ctx.backends(), "context ready");
        Ok(ctx)
    }

    /// Screenshot reporter, when a directory is configured
    pub fn screenshot_reporter(
        &self,
        capture: Box<dyn ScreenCapture>,
    ) -> HallarResult<Option<ScreenshotReporter>> {
        self.report
            .screenshot_dir
            .as_ref()
            .map(|dir| ScreenshotReporter::new(capture, dir))
            .transpose()
    }

    /// Orchestrator over the given OS seams
    #[must_use]
    pub fn build_orchestrator(
        &self,
        windows: Box<dyn WindowSource>,
        screen: Box<dyn ScreenCapture>,
        executor: InteractionExecutor,
    ) -> StrategyOrchestrator {
        StrategyOrchestrator::new(self.window_locator(), windows, screen, executor)
            .with_transformer(self.transformer())
    }

    /// Orchestrator over the live desktop.
    ///
    /// With `dry_run`, pointer events are logged instead of sent.
    #[cfg(feature = "os")]
    pub fn live_orchestrator(&self, dry_run: bool) -> HallarResult<StrategyOrchestrator> {
        use crate::capture::XcapScreen;
        use crate::interaction::{DryRunPointer, EnigoPointer, PointerDriver};
        use crate::window::XcapWindows;

        let driver: Box<dyn PointerDriver> = if dry_run {
            Box::new(DryRunPointer::with_space(self.pointer.space))
        } else {
            Box::new(EnigoPointer::new(self.pointer.space)?)
        };
        Ok(self.build_orchestrator(
            Box::new(XcapWindows),
            Box::new(XcapScreen),
            InteractionExecutor::new(driver),
        ))
    }
}
