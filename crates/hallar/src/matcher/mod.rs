//! Recognition backends.
//!
//! Each backend implements [`Recognizer`]: given a request and a captured
//! [`Frame`], return a [`Detection`] in screen-absolute logical pixels or the
//! [`BackendFailure`] explaining why not. Backends never raise; the
//! orchestrator decides what a failure means.

pub mod template;
pub mod text;
pub mod vision;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::Frame;
use crate::geometry::{BoundingBox, Point};
use crate::request::RecognitionRequest;
use crate::result::BackendFailure;

pub use template::{
    CorrelationPeak, Correlator, NccCorrelator, TemplateMatcher, TemplateMode,
    DEFAULT_LEGACY_CONFIDENCE, DEFAULT_TEMPLATE_CONFIDENCE, TEMPLATE_SCALES,
};
pub use text::{OcrEngine, OcrFactory, OcrSpan, TesseractEngine, TextMatcher};
pub use vision::{VisionFactory, VisionQueryMatcher, VlmReply};

/// Element-location technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Multi-scale template matching
    Template,
    /// Single-scale template matching against legacy assets
    LegacyTemplate,
    /// Optical character recognition
    Ocr,
    /// Vision-language model query
    Vision,
    /// Caller-supplied ratio coordinate
    Fallback,
}

impl Backend {
    /// Stable lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::LegacyTemplate => "legacy_template",
            Self::Ocr => "ocr",
            Self::Vision => "vision",
            Self::Fallback => "fallback",
        }
    }

    /// Whether the backend needs a reference image
    #[must_use]
    pub const fn needs_asset(self) -> bool {
        matches!(self, Self::Template | Self::LegacyTemplate)
    }

    /// Whether the backend needs a text label
    #[must_use]
    pub const fn needs_label(self) -> bool {
        matches!(self, Self::Ocr | Self::Vision)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which part of the element a detection point refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Top-left corner of the bounding box
    TopLeft,
    /// Center of the element
    Center,
}

/// A located element in screen-absolute logical pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Reported point
    pub point: Point,
    /// Convention of `point`
    pub anchor: Anchor,
    /// Element bounds, when the backend knows them
    pub bbox: Option<BoundingBox>,
    /// Backend confidence in [0, 1]
    pub confidence: f64,
}

impl Detection {
    /// Detection reporting the element center
    #[must_use]
    pub const fn center(point: Point, confidence: f64) -> Self {
        Self {
            point,
            anchor: Anchor::Center,
            bbox: None,
            confidence,
        }
    }

    /// Attach bounds
    #[must_use]
    pub const fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Element size, when known
    #[must_use]
    pub fn size(&self) -> Option<(f64, f64)> {
        self.bbox.map(|b| (b.width(), b.height()))
    }

    /// Point to click.
    ///
    /// Top-left detections are moved to the center of their box.
    #[must_use]
    pub fn click_point(&self) -> Point {
        match (self.anchor, self.bbox) {
            (Anchor::TopLeft, Some(bbox)) => bbox.center(),
            _ => self.point,
        }
    }
}

/// Outcome of one backend attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Backend that ran
    pub backend: Backend,
    /// Time the attempt took
    pub elapsed: Duration,
    /// Detection or the reason there is none
    pub outcome: Result<Detection, BackendFailure>,
}

impl RecognitionResult {
    /// Whether the attempt produced a detection
    #[must_use]
    pub const fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Detection, if any
    #[must_use]
    pub fn detection(&self) -> Option<&Detection> {
        self.outcome.as_ref().ok()
    }
}

/// One element-location backend
pub trait Recognizer {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// False once the backend is known to be unusable
    fn is_available(&self) -> bool {
        true
    }

    /// Look for the requested element inside the frame
    fn locate(
        &mut self,
        request: &RecognitionRequest,
        frame: &Frame,
    ) -> Result<Detection, BackendFailure>;

    /// Release engine handles; the next `locate` starts from scratch
    fn teardown(&mut self) {}
}

/// Lazily constructed engine handle.
///
/// Construction runs at most once per lifetime of the slot: a failure is
/// remembered as `Unavailable` until [`EngineSlot::reset`].
#[derive(Debug, Default)]
pub enum EngineSlot<E> {
    /// Not constructed yet
    #[default]
    Empty,
    /// Constructed and usable
    Ready(E),
    /// Construction failed
    Unavailable(String),
}

impl<E> EngineSlot<E> {
    /// Engine handle, constructing it on first use
    pub fn get_or_try_init<F>(&mut self, init: F) -> Result<&mut E, BackendFailure>
    where
        F: FnOnce() -> Result<E, String>,
    {
        if matches!(self, Self::Empty) {
            *self = match init() {
                Ok(engine) => Self::Ready(engine),
                Err(reason) => {
                    tracing::warn!(%reason, "engine unavailable");
                    Self::Unavailable(reason)
                }
            };
        }
        match self {
            Self::Ready(engine) => Ok(engine),
            Self::Unavailable(reason) => Err(BackendFailure::Unavailable(reason.clone())),
            Self::Empty => Err(BackendFailure::Unavailable(
                "engine not initialised".to_string(),
            )),
        }
    }

    /// Whether construction already failed
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Drop the engine or the cached failure
    pub fn reset(&mut self) {
        *self = Self::Empty;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_top_left_click_point_is_box_center() {
        let bbox = BoundingBox::from_origin(Point::new(120.0, 80.0), 50.0, 50.0);
        let detection = Detection {
            point: Point::new(120.0, 80.0),
            anchor: Anchor::TopLeft,
            bbox: Some(bbox),
            confidence: 0.82,
        };
        assert_eq!(detection.click_point(), Point::new(145.0, 105.0));
        assert_eq!(detection.size(), Some((50.0, 50.0)));
    }

    #[test]
    fn test_center_click_point_is_unchanged() {
        let detection = Detection::center(Point::new(10.0, 20.0), 0.9)
            .with_bbox(BoundingBox::from_origin(Point::new(0.0, 0.0), 100.0, 100.0));
        assert_eq!(detection.click_point(), Point::new(10.0, 20.0));
    }

    #[test]
    fn test_backend_serde_names() {
        let json = serde_json::to_string(&Backend::LegacyTemplate).unwrap();
        assert_eq!(json, "\"legacy_template\"");
        assert_eq!(Backend::LegacyTemplate.to_string(), "legacy_template");
        assert!(Backend::Template.needs_asset());
        assert!(Backend::Vision.needs_label());
        assert!(!Backend::Fallback.needs_label());
    }

    mod engine_slot_tests {
        use super::*;

        #[test]
        fn test_init_runs_once_on_success() {
            let mut slot: EngineSlot<u32> = EngineSlot::Empty;
            let mut calls = 0;
            for _ in 0..3 {
                let engine = slot
                    .get_or_try_init(|| {
                        calls += 1;
                        Ok(7)
                    })
                    .unwrap();
                assert_eq!(*engine, 7);
            }
            assert_eq!(calls, 1);
        }

        #[test]
        fn test_failure_is_cached_until_reset() {
            let mut slot: EngineSlot<u32> = EngineSlot::Empty;
            let mut calls = 0;
            for _ in 0..3 {
                let err = slot
                    .get_or_try_init(|| {
                        calls += 1;
                        Err("binary not found".to_string())
                    })
                    .unwrap_err();
                assert_eq!(err, BackendFailure::Unavailable("binary not found".into()));
            }
            assert_eq!(calls, 1);
            assert!(slot.is_unavailable());

            slot.reset();
            assert!(!slot.is_unavailable());
            assert_eq!(*slot.get_or_try_init(|| Ok(1)).unwrap(), 1);
        }
    }
}
