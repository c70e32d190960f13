//! Text recognition (OCR).
//!
//! The engine is built lazily on first use and a construction failure is
//! remembered until teardown, so a missing tesseract install costs one version check
//! per context instead of one per poll iteration.

use image::RgbaImage;
use rusty_tesseract::{Args, Data, Image};
use std::collections::BTreeMap;

use super::{Backend, Detection, EngineSlot, Recognizer};
use crate::capture::{encode_png, Frame};
use crate::geometry::BoundingBox;
use crate::request::RecognitionRequest;
use crate::result::{BackendFailure, HallarResult};
use crate::transform::CoordinateTransformer;

/// Default minimum engine confidence for a span to count
pub const DEFAULT_OCR_MIN_CONFIDENCE: f64 = 0.5;

/// Tesseract row level for single words
const WORD_LEVEL: i32 = 5;

/// One recognised line of text in frame pixels
#[derive(Debug, Clone, PartialEq)]
pub struct OcrSpan {
    /// Recognised text
    pub text: String,
    /// Engine confidence in [0, 1]
    pub confidence: f64,
    /// Bounding polygon vertices
    pub polygon: Vec<(f64, f64)>,
}

impl OcrSpan {
    /// Mean of the polygon vertices
    #[must_use]
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.polygon.is_empty() {
            return None;
        }
        let n = self.polygon.len() as f64;
        let (sx, sy) = self
            .polygon
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        Some((sx / n, sy / n))
    }

    fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let first = self.polygon.first()?;
        Some(self.polygon.iter().fold(
            (first.0, first.1, first.0, first.1),
            |(x0, y0, x1, y1), (x, y)| (x0.min(*x), y0.min(*y), x1.max(*x), y1.max(*y)),
        ))
    }
}

/// Text detection engine
pub trait OcrEngine {
    /// All text spans in the image
    fn recognize(&mut self, image: &RgbaImage) -> HallarResult<Vec<OcrSpan>>;
}

/// Builds an OCR engine on first use
pub type OcrFactory = Box<dyn Fn() -> Result<Box<dyn OcrEngine>, String>>;

/// Tesseract through `rusty_tesseract`
pub struct TesseractEngine {
    args: Args,
}

impl std::fmt::Debug for TesseractEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesseractEngine")
            .field("lang", &self.args.lang)
            .finish_non_exhaustive()
    }
}

impl TesseractEngine {
    /// Check that tesseract runs and build the engine
    pub fn detect(language: impl Into<String>) -> HallarResult<Self> {
        let version = rusty_tesseract::get_tesseract_version()?;
        tracing::debug!(version = %version.lines().next().unwrap_or_default(), "tesseract found");
        Ok(Self {
            args: Args {
                lang: language.into(),
                ..Args::default()
            },
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image: &RgbaImage) -> HallarResult<Vec<OcrSpan>> {
        let file = tempfile::Builder::new()
            .prefix("hallar-ocr-")
            .suffix(".png")
            .tempfile()?;
        std::fs::write(file.path(), encode_png(image)?)?;
        let image = Image::from_path(file.path())?;
        let output = rusty_tesseract::image_to_data(&image, &self.args)?;
        Ok(group_words(&output.data))
    }
}

/// Group tesseract word rows into line spans.
///
/// Rows above word level and words without a confidence are skipped. A line's
/// confidence is the mean word confidence scaled to [0, 1].
#[must_use]
pub fn group_words(rows: &[Data]) -> Vec<OcrSpan> {
    struct Line {
        words: Vec<String>,
        confidence_sum: f64,
        bounds: (f64, f64, f64, f64),
    }

    let mut grouped: BTreeMap<(i32, i32, i32, i32), Line> = BTreeMap::new();
    for row in rows {
        let text = row.text.trim();
        if row.level != WORD_LEVEL || text.is_empty() || row.conf < 0.0 {
            continue;
        }
        let key = (row.page_num, row.block_num, row.par_num, row.line_num);
        let (left, top) = (f64::from(row.left), f64::from(row.top));
        let (right, bottom) = (left + f64::from(row.width), top + f64::from(row.height));

        let line = grouped.entry(key).or_insert_with(|| Line {
            words: Vec::new(),
            confidence_sum: 0.0,
            bounds: (left, top, right, bottom),
        });
        line.words.push(text.to_string());
        line.confidence_sum += f64::from(row.conf);
        let b = &mut line.bounds;
        *b = (b.0.min(left), b.1.min(top), b.2.max(right), b.3.max(bottom));
    }

    grouped
        .into_values()
        .map(|line| {
            let (x0, y0, x1, y1) = line.bounds;
            OcrSpan {
                confidence: line.confidence_sum / line.words.len() as f64 / 100.0,
                text: line.words.join(" "),
                polygon: vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)],
            }
        })
        .collect()
}

/// Locates text labels with an OCR engine.
pub struct TextMatcher {
    slot: EngineSlot<Box<dyn OcrEngine>>,
    factory: OcrFactory,
    min_confidence: f64,
    transformer: CoordinateTransformer,
}

impl std::fmt::Debug for TextMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextMatcher")
            .field("unavailable", &self.slot.is_unavailable())
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

impl TextMatcher {
    /// Matcher whose engine is built by `factory` on first use
    #[must_use]
    pub fn new(factory: OcrFactory) -> Self {
        Self {
            slot: EngineSlot::Empty,
            factory,
            min_confidence: DEFAULT_OCR_MIN_CONFIDENCE,
            transformer: CoordinateTransformer::default(),
        }
    }

    /// Matcher backed by tesseract for `language`
    #[must_use]
    pub fn tesseract(language: impl Into<String>) -> Self {
        let language = language.into();
        Self::new(Box::new(move || {
            TesseractEngine::detect(language.clone())
                .map(|engine| Box::new(engine) as Box<dyn OcrEngine>)
                .map_err(|e| format!("tesseract unavailable: {e}"))
        }))
    }

    /// Spans must score strictly above this
    #[must_use]
    pub const fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Replace the coordinate transformer
    #[must_use]
    pub const fn with_transformer(mut self, transformer: CoordinateTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// First qualifying span containing `label`, as a screen detection
    pub fn find_label(&mut self, label: &str, frame: &Frame) -> Result<Detection, BackendFailure> {
        let factory = &self.factory;
        let engine = self.slot.get_or_try_init(|| factory())?;
        let spans = engine.recognize(frame.image()).map_err(|e| {
            tracing::debug!(error = %e, "OCR engine error");
            BackendFailure::no_match(format!("OCR failed: {e}"))
        })?;

        let span = spans
            .iter()
            .find(|s| s.confidence > self.min_confidence && s.text.contains(label))
            .ok_or_else(|| {
                BackendFailure::no_match(format!("'{label}' not among {} OCR span(s)", spans.len()))
            })?;
        let (cx, cy) = span
            .centroid()
            .ok_or_else(|| BackendFailure::no_match(format!("span '{}' has no polygon", span.text)))?;

        let geometry = frame.geometry();
        let point = self.transformer.frame_pixel_to_screen(cx, cy, &geometry)?;
        let mut detection = Detection::center(point, span.confidence);
        if let Some((x0, y0, x1, y1)) = span.bounds() {
            let a = self.transformer.frame_pixel_to_screen_unchecked(x0, y0, &geometry);
            let b = self.transformer.frame_pixel_to_screen_unchecked(x1, y1, &geometry);
            detection = detection.with_bbox(BoundingBox::from_corners(a, b));
        }
        tracing::debug!(label, text = %span.text, point = %point, "OCR matched");
        Ok(detection)
    }
}

impl Recognizer for TextMatcher {
    fn backend(&self) -> Backend {
        Backend::Ocr
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
        self.find_label(label, frame)
    }

    fn teardown(&mut self) {
        self.slot.reset();
    }
}
