//! Natural-language element queries against a vision-language model.
//!
//! The region is downscaled, sent with a prompt demanding a strict JSON
//! answer, and the reply is parsed leniently: models wrap JSON in prose or
//! code fences, invent fields, and occasionally hallucinate coordinates far
//! outside the image. Anything that does not survive parsing and the
//! out-of-region policy is a plain no-match.

use image::imageops::FilterType;
use serde_json::Value;
use std::borrow::Cow;

use super::{Backend, Detection, EngineSlot, Recognizer};
use crate::capture::{encode_png, Frame};
use crate::geometry::{BoundingBox, Size};
use crate::request::RecognitionRequest;
use crate::result::BackendFailure;
use crate::transform::CoordinateTransformer;
use crate::vlm::{self, VisionBackend, VlmSettings};

/// Largest image sent to the model
pub const MAX_QUERY_SIZE: Size = Size::new(1280, 720);
/// Reply coordinates beyond this magnitude are rejected
pub const MAX_COORDINATE_MAGNITUDE: f64 = 10_000.0;
/// Default minimum model confidence
pub const DEFAULT_VLM_MIN_CONFIDENCE: f64 = 0.5;

/// Builds a VLM client on first use
pub type VisionFactory = Box<dyn Fn() -> Result<Box<dyn VisionBackend>, String>>;

/// Parsed model answer
#[derive(Debug, Clone, PartialEq)]
pub struct VlmReply {
    /// Whether the model saw the element
    pub found: bool,
    /// Horizontal coordinate, ratio or pixel
    pub x: f64,
    /// Vertical coordinate, ratio or pixel
    pub y: f64,
    /// Model confidence
    pub confidence: f64,
    /// Model's description of what it found
    pub description: String,
    /// `[xmin, ymin, xmax, ymax]`, when valid
    pub bbox: Option<[f64; 4]>,
}

/// Prompt for locating `description` in an image of `size`
#[must_use]
pub fn build_prompt(description: &str, size: Size) -> String {
    format!(
        "You are locating a user-interface element in a {w}x{h} screenshot.\n\
         Element: {description}\n\
         Reply with exactly one JSON object and nothing else:\n\
         {{\"found\": true|false, \"x\": number, \"y\": number, \"confidence\": number, \
         \"description\": string, \"box\": [xmin, ymin, xmax, ymax] | null}}\n\
         x and y are the element center as fractions of the image width and height \
         (0 to 1). confidence is between 0 and 1. If the element is not visible, \
         reply with found set to false.",
        w = size.width,
        h = size.height,
    )
}

/// Extract the model's JSON answer from free-form reply text.
pub fn parse_reply(text: &str) -> Result<VlmReply, String> {
    let start = text.find('{').ok_or("no JSON object in reply")?;
    let end = text.rfind('}').ok_or("no JSON object in reply")?;
    if end < start {
        return Err("no JSON object in reply".to_string());
    }
    let value: Value =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("malformed JSON: {e}"))?;
    let object = value.as_object().ok_or("reply is not a JSON object")?;

    let found = match object.get("found") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(other) => return Err(format!("'found' is not a boolean: {other}")),
    };
    let description = object
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !found {
        return Ok(VlmReply {
            found,
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
            description,
            bbox: None,
        });
    }

    let number = |key: &str| -> Result<f64, String> {
        let v = object
            .get(key)
            .ok_or_else(|| format!("missing '{key}'"))?
            .as_f64()
            .ok_or_else(|| format!("'{key}' is not a number"))?;
        if !v.is_finite() || v.abs() > MAX_COORDINATE_MAGNITUDE {
            return Err(format!("'{key}' = {v} out of range"));
        }
        Ok(v)
    };
    let x = number("x")?;
    let y = number("y")?;
    let confidence = number("confidence")?;

    let bbox = object.get("box").and_then(Value::as_array).and_then(|a| {
        let coords: Vec<f64> = a.iter().filter_map(Value::as_f64).collect();
        match coords.as_slice() {
            &[x0, y0, x1, y1]
                if coords
                    .iter()
                    .all(|v| v.is_finite() && v.abs() <= MAX_COORDINATE_MAGNITUDE)
                    && x1 > x0
                    && y1 > y0 =>
            {
                Some([x0, y0, x1, y1])
            }
            _ => None,
        }
    });

    Ok(VlmReply {
        found,
        x,
        y,
        confidence,
        description,
        bbox,
    })
}

/// Largest size within `max` with the same aspect ratio, never upscaled
#[must_use]
pub fn fit_within(size: Size, max: Size) -> Size {
    if size.width == 0 || size.height == 0 {
        return size;
    }
    let scale = (f64::from(max.width) / f64::from(size.width))
        .min(f64::from(max.height) / f64::from(size.height))
        .min(1.0);
    Size::new(
        ((f64::from(size.width) * scale).round() as u32).max(1),
        ((f64::from(size.height) * scale).round() as u32).max(1),
    )
}

/// Locates elements from a natural-language description.
pub struct VisionQueryMatcher {
    slot: EngineSlot<Box<dyn VisionBackend>>,
    factory: VisionFactory,
    min_confidence: f64,
    max_size: Size,
    transformer: CoordinateTransformer,
}

impl std::fmt::Debug for VisionQueryMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionQueryMatcher")
            .field("unavailable", &self.slot.is_unavailable())
            .field("min_confidence", &self.min_confidence)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl VisionQueryMatcher {
    /// Matcher whose client is built by `factory` on first use
    #[must_use]
    pub fn new(factory: VisionFactory) -> Self {
        Self {
            slot: EngineSlot::Empty,
            factory,
            min_confidence: DEFAULT_VLM_MIN_CONFIDENCE,
            max_size: MAX_QUERY_SIZE,
            transformer: CoordinateTransformer::default(),
        }
    }

    /// Matcher connecting with the given settings
    #[must_use]
    pub fn connect(settings: VlmSettings) -> Self {
        Self::new(Box::new(move || {
            vlm::connect(&settings).map_err(|e| format!("{} client unavailable: {e}", settings.protocol))
        }))
    }

    /// Replies below this confidence are no-matches
    #[must_use]
    pub const fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Largest image sent to the model
    #[must_use]
    pub const fn with_max_size(mut self, max_size: Size) -> Self {
        self.max_size = max_size;
        self
    }

    /// Replace the coordinate transformer
    #[must_use]
    pub const fn with_transformer(mut self, transformer: CoordinateTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Ask the model for `description` inside the frame
    pub fn query(&mut self, description: &str, frame: &Frame) -> Result<Detection, BackendFailure> {
        let factory = &self.factory;
        let backend = self.slot.get_or_try_init(|| factory())?;

        let original = frame.pixel_size();
        let target = fit_within(original, self.max_size);
        let image = if target == original {
            Cow::Borrowed(frame.image())
        } else {
            Cow::Owned(image::imageops::resize(
                frame.image(),
                target.width,
                target.height,
                FilterType::Triangle,
            ))
        };
        let png = encode_png(&image).map_err(|e| BackendFailure::no_match(e.to_string()))?;

        let text = backend
            .query(&build_prompt(description, target), &png)
            .map_err(|e| {
                tracing::debug!(protocol = %backend.protocol(), error = %e, "VLM request failed");
                BackendFailure::no_match(format!("VLM request failed: {e}"))
            })?;
        let reply = parse_reply(&text).map_err(|e| {
            tracing::debug!(reply = %text, error = %e, "unusable VLM reply");
            BackendFailure::no_match(format!("unusable VLM reply: {e}"))
        })?;

        if !reply.found {
            return Err(BackendFailure::no_match(format!(
                "model did not find '{description}'"
            )));
        }
        if reply.confidence < self.min_confidence {
            return Err(BackendFailure::no_match(format!(
                "model confidence {:.2} < {:.2}",
                reply.confidence, self.min_confidence
            )));
        }

        let geometry = frame.geometry().resized(target);
        let point = self
            .transformer
            .resolve(reply.x, reply.y, &geometry)
            .inspect_err(|e| tracing::warn!(description, error = %e, "VLM coordinate rejected"))?;

        let mut detection = Detection::center(point, reply.confidence);
        if let Some([x0, y0, x1, y1]) = reply.bbox {
            let corners = (
                self.transformer.resolve(x0, y0, &geometry),
                self.transformer.resolve(x1, y1, &geometry),
            );
            if let (Ok(a), Ok(b)) = corners {
                detection = detection.with_bbox(BoundingBox::from_corners(a, b));
            }
        }
        tracing::debug!(description, point = %point, confidence = reply.confidence, "VLM matched");
        Ok(detection)
    }
}

impl Recognizer for VisionQueryMatcher {
    fn backend(&self) -> Backend {
        Backend::Vision
    }

    fn is_available(&self) -> bool {
        !self.slot.is_unavailable()
    }

    fn locate(
        &mut self,
        request: &RecognitionRequest,
        frame: &Frame,
    ) -> Result<Detection, BackendFailure> {
        let label = request
            .label()
            .ok_or_else(|| BackendFailure::AssetMissing("request has no label".to_string()))?;
        self.query(label, frame)
    }

    fn teardown(&mut self) {
        self.slot.reset();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::geometry::{Point, SearchRegion};
    use crate::vlm::{VlmClientError, VlmProtocol};
    use image::RgbaImage;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Returns a canned reply and records the size of each image it was sent.
    struct ScriptedVlm {
        reply: String,
        sizes: Rc<RefCell<Vec<(u32, u32)>>>,
    }

    impl VisionBackend for ScriptedVlm {
        fn protocol(&self) -> VlmProtocol {
            VlmProtocol::Ollama
        }

        fn query(&self, _prompt: &str, image_png: &[u8]) -> Result<String, VlmClientError> {
            let image = image::load_from_memory(image_png).unwrap();
            self.sizes
                .borrow_mut()
                .push((image.width(), image.height()));
            Ok(self.reply.clone())
        }
    }

    fn scripted(reply: &str) -> (VisionQueryMatcher, Rc<RefCell<Vec<(u32, u32)>>>) {
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let shared = Rc::clone(&sizes);
        let reply = reply.to_string();
        let matcher = VisionQueryMatcher::new(Box::new(move || {
            Ok::<_, String>(Box::new(ScriptedVlm {
                reply: reply.clone(),
                sizes: Rc::clone(&shared),
            }) as Box<dyn VisionBackend>)
        }));
        (matcher, sizes)
    }

    fn frame(left: i32, top: i32, width: u32, height: u32) -> Frame {
        Frame::new(
            RgbaImage::new(width, height),
            SearchRegion::new(left, top, i64::from(width), i64::from(height)).unwrap(),
            1.0,
        )
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_fenced_reply_with_prose() {
            let text = "Sure! Here you go:\n```json\n{\"found\": true, \"x\": 0.5, \"y\": 0.25, \"confidence\": 0.9, \"description\": \"blue button\", \"box\": [0.4, 0.2, 0.6, 0.3]}\n```\nLet me know.";
            let reply = parse_reply(text).unwrap();
            assert!(reply.found);
            assert_eq!((reply.x, reply.y), (0.5, 0.25));
            assert_eq!(reply.description, "blue button");
            assert_eq!(reply.bbox, Some([0.4, 0.2, 0.6, 0.3]));
        }

        #[test]
        fn test_non_json_is_rejected() {
            assert!(parse_reply("I cannot see a login button").is_err());
            assert!(parse_reply("{not json}").is_err());
            assert!(parse_reply("} backwards {").is_err());
            assert!(parse_reply("[1, 2]").is_err());
        }

        #[test]
        fn test_bad_coordinates_are_rejected() {
            assert!(parse_reply(r#"{"found": true, "x": "0.5", "y": 0.5, "confidence": 1}"#).is_err());
            assert!(parse_reply(r#"{"found": true, "y": 0.5, "confidence": 1}"#).is_err());
            assert!(parse_reply(r#"{"found": true, "x": 10001, "y": 5, "confidence": 1}"#).is_err());
            assert!(parse_reply(r#"{"found": true, "x": 5, "y": -20000, "confidence": 1}"#).is_err());
        }

        #[test]
        fn test_not_found_needs_no_coordinates() {
            let reply = parse_reply(r#"{"found": false, "x": null, "description": "nothing"}"#).unwrap();
            assert!(!reply.found);
        }

        #[test]
        fn test_invalid_box_is_dropped() {
            let reply = parse_reply(
                r#"{"found": true, "x": 10, "y": 10, "confidence": 0.8, "box": [50, 50, 10, 10]}"#,
            )
            .unwrap();
            assert_eq!(reply.bbox, None);
            let reply = parse_reply(
                r#"{"found": true, "x": 10, "y": 10, "confidence": 0.8, "box": null}"#,
            )
            .unwrap();
            assert_eq!(reply.bbox, None);
        }
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(Size::new(2560, 1440), MAX_QUERY_SIZE), Size::new(1280, 720));
        assert_eq!(fit_within(Size::new(1600, 1200), MAX_QUERY_SIZE), Size::new(960, 720));
        assert_eq!(fit_within(Size::new(800, 600), MAX_QUERY_SIZE), Size::new(800, 600));
    }

    #[test]
    fn test_ratio_reply_on_downscaled_frame() {
        let (mut matcher, sizes) = scripted(
            r#"{"found": true, "x": 0.5, "y": 0.5, "confidence": 0.9, "description": "ok", "box": null}"#,
        );
        let detection = matcher.query("OK button", &frame(100, 200, 1600, 1200)).unwrap();
        assert_eq!(detection.point, Point::new(900.0, 800.0));
        assert_eq!(*sizes.borrow(), vec![(960, 720)]);
    }

    #[test]
    fn test_pixel_reply_is_rescaled_to_original() {
        let (mut matcher, _) = scripted(
            r#"{"found": true, "x": 480, "y": 360, "confidence": 0.9, "box": [470, 350, 490, 370]}"#,
        );
        let detection = matcher.query("OK button", &frame(0, 0, 1600, 1200)).unwrap();
        assert_eq!(detection.point, Point::new(800.0, 600.0));
        let (w, h) = detection.size().unwrap();
        assert!((w - 20.0 * 1600.0 / 960.0).abs() < 1e-9);
        assert!((h - 20.0 * 1200.0 / 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_region_reply_maps_back_to_screen() {
        let (matcher, sizes) = scripted(
            r#"{"found": true, "x": 320, "y": 240, "confidence": 0.9, "description": "save"}"#,
        );
        let mut matcher = matcher.with_max_size(Size::new(640, 480));
        let detection = matcher.query("Save button", &frame(100, 200, 800, 600)).unwrap();
        assert_eq!(*sizes.borrow(), vec![(640, 480)]);
        assert_eq!(detection.point, Point::new(500.0, 500.0));
    }

    #[test]
    fn test_hallucinated_point_is_out_of_bounds() {
        let (mut matcher, _) = scripted(r#"{"found": true, "x": 5000, "y": 10, "confidence": 0.9}"#);
        let err = matcher.query("OK", &frame(0, 0, 800, 600)).unwrap_err();
        assert!(matches!(err, BackendFailure::OutOfBounds(_)));
    }

    #[test]
    fn test_low_confidence_and_not_found_are_no_match() {
        let (mut matcher, _) = scripted(r#"{"found": true, "x": 0.5, "y": 0.5, "confidence": 0.3}"#);
        assert!(matches!(
            matcher.query("OK", &frame(0, 0, 100, 100)),
            Err(BackendFailure::NoMatch(_))
        ));
        let (mut matcher, _) = scripted(r#"{"found": false}"#);
        assert!(matches!(
            matcher.query("OK", &frame(0, 0, 100, 100)),
            Err(BackendFailure::NoMatch(_))
        ));
    }

    #[test]
    fn test_missing_key_makes_backend_unavailable() {
        let mut matcher = VisionQueryMatcher::connect(VlmSettings {
            protocol: VlmProtocol::Gemini,
            api_key_env: "HALLAR_TEST_GEMINI_KEY_NEVER_SET".to_string(),
            ..VlmSettings::default()
        });
        assert!(matcher.is_available());
        let err = matcher.query("OK", &frame(0, 0, 10, 10)).unwrap_err();
        assert!(matches!(err, BackendFailure::Unavailable(_)));
        assert!(!matcher.is_available());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_large_magnitudes_rejected(x in 10_000.001f64..1e9, y in -1e9f64..1e9) {
                let text = format!(r#"{{"found": true, "x": {x}, "y": {y}, "confidence": 1.0}}"#);
                prop_assert!(parse_reply(&text).is_err());
            }

            #[test]
            fn prop_arbitrary_text_never_panics(text in ".{0,80}") {
                let _ = parse_reply(&text);
            }
        }
    }
}
