//! Hallar: Resilient GUI Element Locator for Desktop Automation
//!
//! Hallar (Spanish: "to find") resolves a UI element of a running desktop
//! application to one clickable screen coordinate. Several recognition
//! backends are tried in a caller-chosen priority order until one succeeds
//! or the time budget runs out; a caller-supplied ratio coordinate is the
//! last resort.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       HALLAR Architecture                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────────┐   ┌──────────────────────────┐  │
//! │  │ Request   │──►│ Strategy     │──►│ Template │ OCR │ VLM     │  │
//! │  │ (asset,   │   │ Orchestrator │   │ (Recognizer backends)    │  │
//! │  │  label)   │   └──────┬───────┘   └──────────────────────────┘  │
//! │  └───────────┘          │ resolved point / fallback ratio         │
//! │                         ▼                                         │
//! │                 ┌──────────────┐    ┌──────────────┐              │
//! │                 │ Interaction  │──► │ Reporter     │              │
//! │                 │ Executor     │    │ + Statistics │              │
//! │                 └──────────────┘    └──────────────┘              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hallar::prelude::*;
//!
//! fn main() -> HallarResult<()> {
//!     let config = HallarConfig::load("hallar.yaml")?;
//!     let mut ctx = config.build_context()?;
//!     let mut orchestrator = config.live_orchestrator(false)?;
//!
//!     let save = config
//!         .request()
//!         .asset("save_button")
//!         .label("Save")
//!         .fallback(0.92, 0.06, FallbackAnchor::Window)
//!         .action(ClickKind::Single)
//!         .build()?;
//!     orchestrator.locate(&mut ctx, &save)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

/// Screen capture seam
pub mod capture;
/// YAML configuration
pub mod config;
/// Per-session state
pub mod context;
/// Points, sizes and regions
pub mod geometry;
/// Pointer actions
pub mod interaction;
/// Recognition backends
pub mod matcher;
/// Backend orchestration
pub mod orchestrator;
/// Audit reporting
pub mod report;
/// Recognition requests
pub mod request;
/// Errors
pub mod result;
/// Statistics and run admission
pub mod stats;
/// Backend priority presets
pub mod strategy;
/// Coordinate conversions
pub mod transform;
/// VLM HTTP clients
pub mod vlm;
/// Target window discovery
pub mod window;

pub use capture::{Frame, ScreenCapture, StaticScreen};
pub use config::HallarConfig;
pub use context::RecognitionContext;
pub use geometry::{BoundingBox, Point, SearchRegion, Size};
pub use interaction::{
    ClickKind, DryRunPointer, InteractionExecutor, PointerDriver, PointerEvent, PointerSpace,
    ResolvedAction,
};
pub use matcher::{
    Anchor, Backend, Detection, RecognitionResult, Recognizer, TemplateMatcher, TextMatcher,
    VisionQueryMatcher,
};
pub use orchestrator::{FailureReason, LocatorState, Outcome, StrategyOrchestrator};
pub use report::{MemoryReporter, RecognitionEvent, Reporter, ScreenshotReporter};
pub use request::{FallbackAnchor, FallbackCoordinate, RecognitionRequest, RegionOverride};
pub use result::{BackendFailure, HallarError, HallarResult};
pub use stats::{AdmissionPolicy, HealthViolation, RecognitionStatistics};
pub use strategy::Strategy;
pub use transform::CoordinateTransformer;
pub use vlm::{VlmProtocol, VlmSettings};
pub use window::{StaticWindows, WindowInfo, WindowLocator, WindowSource};

#[cfg(feature = "os")]
pub use capture::XcapScreen;
#[cfg(feature = "os")]
pub use interaction::EnigoPointer;
#[cfg(feature = "os")]
pub use window::XcapWindows;

/// Commonly used items
pub mod prelude {
    pub use crate::{
        AdmissionPolicy, Backend, ClickKind, FallbackAnchor, HallarConfig, HallarError,
        HallarResult, Point, RecognitionContext, RecognitionRequest, SearchRegion, Strategy,
        StrategyOrchestrator,
    };
}
