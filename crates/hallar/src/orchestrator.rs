//! Strategy orchestration.
//!
//! The [`StrategyOrchestrator`] turns one [`RecognitionRequest`] into one
//! resolved screen point. It polls the target window until the time budget
//! runs out, trying backends in the request's priority order; the first
//! backend success wins. When every backend keeps failing it falls back to
//! the caller's ratio coordinate, and only fails when neither a window nor a
//! fallback is available.
//!
//! ```text
//!   Polling ──success──────────────► Resolved
//!      │
//!   timeout
//!      ▼
//!   ExhaustedFallback ──fallback──► Resolved
//!      │
//!      └──no window / no fallback─► Failed
//! ```

use std::time::{Duration, Instant};

use crate::capture::ScreenCapture;
use crate::context::RecognitionContext;
use crate::geometry::{Point, SearchRegion};
use crate::interaction::{InteractionExecutor, ResolvedAction};
use crate::matcher::{Anchor, Backend, Detection, RecognitionResult};
use crate::report::RecognitionEvent;
use crate::request::RecognitionRequest;
use crate::result::{BackendFailure, HallarError, HallarResult};
use crate::strategy::PlanInputs;
use crate::transform::CoordinateTransformer;
use crate::window::{WindowLocator, WindowSource};

/// Locator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorState {
    /// Trying backends until the time budget runs out
    Polling,
    /// A point was found
    Resolved,
    /// Backends exhausted; computing the fallback coordinate
    ExhaustedFallback,
    /// No point could be produced
    Failed,
}

/// Why a request ended in [`LocatorState::Failed`] while the window was present
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No backend succeeded and the request carries no fallback coordinate
    NoFallback,
    /// The fallback coordinate falls outside the window
    FallbackRejected(BackendFailure),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFallback => f.write_str("no backend matched and no fallback coordinate given"),
            Self::FallbackRejected(failure) => write!(f, "fallback rejected: {failure}"),
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Final state, [`LocatorState::Resolved`] or [`LocatorState::Failed`]
    pub state: LocatorState,
    /// Backend that produced the point
    pub backend: Option<Backend>,
    /// Winning detection
    pub detection: Option<Detection>,
    /// Click point before the caller's offset, logical screen pixels
    pub point: Option<Point>,
    /// Region the point was found in
    pub region: Option<SearchRegion>,
    /// Pointer action performed, when one was requested
    pub action: Option<ResolvedAction>,
    /// Failure cause, for failed requests
    pub failure: Option<FailureReason>,
    /// Every backend attempt, in order
    pub attempts: Vec<RecognitionResult>,
    /// Wall-clock time spent
    pub elapsed: Duration,
}

impl Outcome {
    /// Whether a point was produced
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state == LocatorState::Resolved
    }

    /// Whether the point came from the fallback coordinate
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        self.backend == Some(Backend::Fallback)
    }

    /// Most recent backend failure
    #[must_use]
    pub fn last_failure(&self) -> Option<&BackendFailure> {
        self.attempts
            .iter()
            .rev()
            .find_map(|attempt| attempt.outcome.as_ref().err())
    }
}

#[derive(Debug)]
struct Hit {
    backend: Backend,
    detection: Detection,
    region: SearchRegion,
    dpi_scale: f64,
}

enum Miss {
    WindowUnavailable,
    Failed(FailureReason),
}

/// Drives backends for a request.
pub struct StrategyOrchestrator {
    locator: WindowLocator,
    windows: Box<dyn WindowSource>,
    screen: Box<dyn ScreenCapture>,
    transformer: CoordinateTransformer,
    executor: InteractionExecutor,
}

impl std::fmt::Debug for StrategyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyOrchestrator")
            .field("locator", &self.locator)
            .field("transformer", &self.transformer)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl StrategyOrchestrator {
    /// Orchestrator over a window source, a screen and a pointer executor
    #[must_use]
    pub fn new(
        locator: WindowLocator,
        windows: Box<dyn WindowSource>,
        screen: Box<dyn ScreenCapture>,
        executor: InteractionExecutor,
    ) -> Self {
        Self {
            locator,
            windows,
            screen,
            transformer: CoordinateTransformer::default(),
            executor,
        }
    }

    /// Use a transformer with a different tolerance
    #[must_use]
    pub const fn with_transformer(mut self, transformer: CoordinateTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Window selection rules
    #[must_use]
    pub const fn locator(&self) -> &WindowLocator {
        &self.locator
    }

    /// Run a request to completion.
    ///
    /// Returns [`HallarError::WindowUnavailable`] when the target window never
    /// became usable; every other miss is an `Ok` outcome in the
    /// [`LocatorState::Failed`] state.
    pub fn run(
        &mut self,
        ctx: &mut RecognitionContext,
        request: &RecognitionRequest,
    ) -> HallarResult<Outcome> {
        let started = Instant::now();
        let deadline = started + request.timeout();
        let mut attempts = Vec::new();
        let mut dpi_scale = 1.0;
        let mut hit = None;
        let mut miss = None;
        let mut state = LocatorState::Polling;

        tracing::debug!(
            element = request.target(),
            strategy = %request.strategy(),
            timeout_ms = millis(request.timeout()),
            "locating"
        );

        loop {
            state = match state {
                LocatorState::Polling => {
                    if let Some(found) =
                        self.poll_once(ctx, request, deadline, &mut attempts, &mut dpi_scale)
                    {
                        hit = Some(found);
                        LocatorState::Resolved
                    } else {
                        let now = Instant::now();
                        if now >= deadline {
                            LocatorState::ExhaustedFallback
                        } else {
                            std::thread::sleep(request.poll_interval().min(deadline - now));
                            if Instant::now() >= deadline {
                                LocatorState::ExhaustedFallback
                            } else {
                                LocatorState::Polling
                            }
                        }
                    }
                }
                LocatorState::ExhaustedFallback => {
                    match self.fallback(ctx, request, dpi_scale) {
                        Ok(found) => {
                            let result = RecognitionResult {
                                backend: Backend::Fallback,
                                elapsed: Duration::ZERO,
                                outcome: Ok(found.detection.clone()),
                            };
                            ctx.stats_mut().record_attempt(&result);
                            attempts.push(result);
                            hit = Some(found);
                            LocatorState::Resolved
                        }
                        Err(reason) => {
                            miss = Some(reason);
                            LocatorState::Failed
                        }
                    }
                }
                LocatorState::Resolved | LocatorState::Failed => break,
            };
        }

        let elapsed = started.elapsed();
        match (hit, miss) {
            (Some(hit), _) => self.finish(ctx, request, hit, attempts, elapsed),
            (None, Some(Miss::Failed(reason))) => {
                ctx.stats_mut().record_failure(request.target());
                tracing::warn!(
                    element = request.target(),
                    elapsed_ms = millis(elapsed),
                    %reason,
                    "element not found"
                );
                Ok(Outcome {
                    state,
                    backend: None,
                    detection: None,
                    point: None,
                    region: None,
                    action: None,
                    failure: Some(reason),
                    attempts,
                    elapsed,
                })
            }
            (None, _) => {
                ctx.stats_mut().record_failure(request.target());
                let titles = self.locator.titles_display();
                tracing::error!(element = request.target(), %titles, "target window unavailable");
                Err(HallarError::WindowUnavailable {
                    titles,
                    waited_ms: millis(elapsed),
                })
            }
        }
    }

    /// Run a request and report whether it resolved.
    ///
    /// An unavailable window reads as `false`.
    pub fn locate(
        &mut self,
        ctx: &mut RecognitionContext,
        request: &RecognitionRequest,
    ) -> HallarResult<bool> {
        match self.run(ctx, request) {
            Ok(outcome) => Ok(outcome.is_resolved()),
            Err(HallarError::WindowUnavailable { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check that an element is on screen without clicking it.
    ///
    /// The fallback coordinate is never used. With `strict`, a miss becomes
    /// [`HallarError::StrictVerificationFailure`].
    pub fn verify_exists(
        &mut self,
        ctx: &mut RecognitionContext,
        request: &RecognitionRequest,
        strict: bool,
    ) -> HallarResult<bool> {
        let started = Instant::now();
        let check = request.for_verification();
        let (attempts, detail) = match self.run(ctx, &check) {
            Ok(outcome) if outcome.is_resolved() => return Ok(true),
            Ok(outcome) => (
                outcome.attempts.len(),
                outcome
                    .last_failure()
                    .map_or_else(|| "no backend could run".to_string(), ToString::to_string),
            ),
            Err(e @ HallarError::WindowUnavailable { .. }) => (0, e.to_string()),
            Err(e) => return Err(e),
        };
        if !strict {
            return Ok(false);
        }
        Err(HallarError::StrictVerificationFailure {
            target: request.target().to_string(),
            waited_ms: millis(started.elapsed()),
            attempts,
            detail,
        })
    }

    fn poll_once(
        &self,
        ctx: &mut RecognitionContext,
        request: &RecognitionRequest,
        deadline: Instant,
        attempts: &mut Vec<RecognitionResult>,
        dpi_scale: &mut f64,
    ) -> Option<Hit> {
        let window = self.locator.acquire(self.windows.as_ref())?;
        let region = match request.region() {
            Some(region) => match region.resolve(&self.transformer, &window) {
                Ok(region) => region,
                Err(e) => {
                    tracing::debug!(error = %e, "region override unusable for this window");
                    return None;
                }
            },
            None => window,
        };
        let frame = match self.screen.capture(&region) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%region, error = %e, "capture failed");
                return None;
            }
        };
        *dpi_scale = frame.dpi_scale();

        let plan = request.strategy().plan(PlanInputs {
            has_asset: request.asset().is_some(),
            has_label: request.label().is_some(),
            vision_ready: ctx.vision_ready(),
        });
        for (index, backend) in plan.into_iter().enumerate() {
            if index > 0 && Instant::now() >= deadline {
                tracing::debug!("time budget spent mid-iteration");
                break;
            }
            let Some(recognizer) = ctx.recognizer_mut(backend) else {
                continue;
            };
            if !recognizer.is_available() {
                continue;
            }
            let attempt_started = Instant::now();
            let outcome = recognizer
                .locate(request, &frame)
                .and_then(|detection| self.confine(detection, frame.region()));
            let result = RecognitionResult {
                backend,
                elapsed: attempt_started.elapsed(),
                outcome,
            };
            ctx.stats_mut().record_attempt(&result);
            match &result.outcome {
                Ok(detection) => tracing::debug!(
                    %backend,
                    point = %detection.point,
                    confidence = detection.confidence,
                    "backend matched"
                ),
                Err(failure @ BackendFailure::OutOfBounds(_)) => {
                    tracing::warn!(%backend, %failure, "coordinate rejected");
                }
                Err(failure) => tracing::debug!(%backend, %failure, "backend missed"),
            }
            let detection = result.detection().cloned();
            attempts.push(result);
            if let Some(detection) = detection {
                return Some(Hit {
                    backend,
                    detection,
                    region: *frame.region(),
                    dpi_scale: frame.dpi_scale(),
                });
            }
        }
        None
    }

    /// Hold a detection's click point to the searched region
    fn confine(
        &self,
        detection: Detection,
        region: &SearchRegion,
    ) -> Result<Detection, BackendFailure> {
        let point = detection.click_point();
        let accepted = self.transformer.accept(point, region)?;
        if accepted == point {
            Ok(detection)
        } else {
            Ok(Detection {
                point: accepted,
                anchor: Anchor::Center,
                ..detection
            })
        }
    }

    fn fallback(
        &self,
        ctx: &RecognitionContext,
        request: &RecognitionRequest,
        dpi_scale: f64,
    ) -> Result<Hit, Miss> {
        let window = self
            .locator
            .acquire(self.windows.as_ref())
            .ok_or(Miss::WindowUnavailable)?;
        let fallback = request
            .fallback()
            .ok_or(Miss::Failed(FailureReason::NoFallback))?;
        let raw = fallback.resolve(&self.transformer, &window, ctx.last_click());
        let point = self
            .transformer
            .accept(raw, &window)
            .map_err(|failure| Miss::Failed(FailureReason::FallbackRejected(failure)))?;
        tracing::warn!(
            element = request.target(),
            %point,
            anchor = ?fallback.anchor,
            "using fallback coordinate"
        );
        Ok(Hit {
            backend: Backend::Fallback,
            detection: Detection::center(point, 0.0),
            region: window,
            dpi_scale,
        })
    }

    fn finish(
        &mut self,
        ctx: &mut RecognitionContext,
        request: &RecognitionRequest,
        hit: Hit,
        attempts: Vec<RecognitionResult>,
        elapsed: Duration,
    ) -> HallarResult<Outcome> {
        let point = hit.detection.click_point();
        let action = request.action().map(|kind| {
            self.executor.execute(
                point,
                kind,
                request.offset(),
                hit.dpi_scale,
                request.target(),
                ctx.reporter_mut(),
            )
        });

        // The element was found even when the pointer action fails.
        if let Some(reporter) = ctx.reporter_mut() {
            reporter.record_recognition(&RecognitionEvent {
                target: request.target().to_string(),
                point,
                size: hit.detection.size(),
                backend: hit.backend,
                region: hit.region,
                bbox: hit.detection.bbox,
            });
        }
        ctx.stats_mut().record_resolution(request.target(), hit.backend);

        let action = action.transpose()?;
        if let Some(action) = &action {
            ctx.set_last_click(action.logical());
        }

        tracing::info!(
            element = request.target(),
            backend = %hit.backend,
            %point,
            confidence = hit.detection.confidence,
            elapsed_ms = millis(elapsed),
            "element resolved"
        );

        Ok(Outcome {
            state: LocatorState::Resolved,
            backend: Some(hit.backend),
            point: Some(point),
            region: Some(hit.region),
            detection: Some(hit.detection),
            action,
            failure: None,
            attempts,
            elapsed,
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
