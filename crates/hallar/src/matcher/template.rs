//! Template matching.
//!
//! Normalized cross-correlation of a reference image against the captured
//! region, tried at a small fixed set of scales to absorb minor rendering
//! differences. The legacy variant matches at native scale only against the
//! legacy asset set and reports the match center.

use image::imageops::FilterType;
use image::GrayImage;
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{Anchor, Backend, Detection, Recognizer};
use crate::capture::Frame;
use crate::geometry::BoundingBox;
use crate::request::RecognitionRequest;
use crate::result::BackendFailure;
use crate::transform::{self, CoordinateTransformer};

/// Scales tried, in order
pub const TEMPLATE_SCALES: [f64; 5] = [1.0, 0.95, 1.05, 0.9, 1.1];
/// Default threshold for the multi-scale matcher
pub const DEFAULT_TEMPLATE_CONFIDENCE: f64 = 0.7;
/// Default threshold for the legacy matcher
pub const DEFAULT_LEGACY_CONFIDENCE: f64 = 0.8;

const ASSET_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Best correlation of a needle inside a haystack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Needle top-left x in haystack pixels
    pub x: u32,
    /// Needle top-left y in haystack pixels
    pub y: u32,
    /// Correlation score
    pub score: f64,
}

/// Correlation step of the matcher
pub trait Correlator {
    /// Highest-scoring placement of `needle`, `None` when it does not fit
    fn best_match(&self, haystack: &GrayImage, needle: &GrayImage) -> Option<CorrelationPeak>;
}

/// imageproc normalized cross-correlation
#[derive(Debug, Clone, Copy, Default)]
pub struct NccCorrelator;

impl Correlator for NccCorrelator {
    fn best_match(&self, haystack: &GrayImage, needle: &GrayImage) -> Option<CorrelationPeak> {
        if needle.width() > haystack.width() || needle.height() > haystack.height() {
            return None;
        }
        let scores = match_template(
            haystack,
            needle,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        let extremes = find_extremes(&scores);
        Some(CorrelationPeak {
            x: extremes.max_value_location.0,
            y: extremes.max_value_location.1,
            score: f64::from(extremes.max_value),
        })
    }
}

/// Matching variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMode {
    /// All scales, top-left anchor
    Standard,
    /// Native scale only, center anchor
    Legacy,
}

#[derive(Debug)]
struct ScaledTemplate {
    scale: f64,
    image: GrayImage,
}

/// Finds reference images inside a frame.
pub struct TemplateMatcher {
    mode: TemplateMode,
    asset_roots: Vec<PathBuf>,
    threshold: f64,
    correlator: Box<dyn Correlator>,
    transformer: CoordinateTransformer,
    cache: HashMap<String, Vec<ScaledTemplate>>,
}

impl std::fmt::Debug for TemplateMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateMatcher")
            .field("mode", &self.mode)
            .field("asset_roots", &self.asset_roots)
            .field("threshold", &self.threshold)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl TemplateMatcher {
    /// Multi-scale matcher over an asset root
    #[must_use]
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            mode: TemplateMode::Standard,
            asset_roots: vec![asset_root.into()],
            threshold: DEFAULT_TEMPLATE_CONFIDENCE,
            correlator: Box::new(NccCorrelator),
            transformer: CoordinateTransformer::default(),
            cache: HashMap::new(),
        }
    }

    /// Legacy matcher; assets missing under `legacy_root` are looked up under `fallback_root`
    #[must_use]
    pub fn legacy(legacy_root: impl Into<PathBuf>, fallback_root: impl Into<PathBuf>) -> Self {
        Self {
            mode: TemplateMode::Legacy,
            asset_roots: vec![legacy_root.into(), fallback_root.into()],
            threshold: DEFAULT_LEGACY_CONFIDENCE,
            ..Self::new(PathBuf::new())
        }
    }

    /// Confidence threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Replace the correlation step
    #[must_use]
    pub fn with_correlator(mut self, correlator: Box<dyn Correlator>) -> Self {
        self.correlator = correlator;
        self
    }

    /// Replace the coordinate transformer
    #[must_use]
    pub const fn with_transformer(mut self, transformer: CoordinateTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Matching variant
    #[must_use]
    pub const fn mode(&self) -> TemplateMode {
        self.mode
    }

    /// Configured threshold
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Path of an asset id, trying the id as given and then known extensions
    #[must_use]
    pub fn resolve_asset(&self, asset_id: &str) -> Option<PathBuf> {
        self.asset_roots.iter().find_map(|root| {
            let direct = root.join(asset_id);
            if direct.is_file() {
                return Some(direct);
            }
            ASSET_EXTENSIONS
                .iter()
                .map(|ext| root.join(format!("{asset_id}.{ext}")))
                .find(|p| p.is_file())
        })
    }

    fn scales(&self) -> &'static [f64] {
        match self.mode {
            TemplateMode::Standard => &TEMPLATE_SCALES,
            TemplateMode::Legacy => &TEMPLATE_SCALES[..1],
        }
    }

    /// Load a reference image and resize it once to every scale tried.
    fn load(&mut self, asset_id: &str) -> Result<(), BackendFailure> {
        if self.cache.contains_key(asset_id) {
            return Ok(());
        }
        let path = self.resolve_asset(asset_id).ok_or_else(|| {
            BackendFailure::AssetMissing(format!("no reference image for '{asset_id}'"))
        })?;
        let reference = load_gray(&path)?;
        let scaled = self
            .scales()
            .iter()
            .filter_map(|&scale| {
                let width = (f64::from(reference.width()) * scale).round() as u32;
                let height = (f64::from(reference.height()) * scale).round() as u32;
                if width == 0 || height == 0 {
                    return None;
                }
                let image = if width == reference.width() && height == reference.height() {
                    reference.clone()
                } else {
                    image::imageops::resize(&reference, width, height, FilterType::Triangle)
                };
                Some(ScaledTemplate { scale, image })
            })
            .collect();
        tracing::debug!(asset_id, path = %path.display(), "reference image loaded");
        self.cache.insert(asset_id.to_string(), scaled);
        Ok(())
    }

    /// Number of reference images held in memory, one per asset and scale
    #[must_use]
    pub fn cached_templates(&self) -> usize {
        self.cache.values().map(Vec::len).sum()
    }

    /// Match a reference image against a frame
    pub fn match_frame(
        &mut self,
        asset_id: &str,
        frame: &Frame,
        threshold: f64,
    ) -> Result<Detection, BackendFailure> {
        self.load(asset_id)?;
        let templates = self
            .cache
            .get(asset_id)
            .ok_or_else(|| BackendFailure::AssetMissing(asset_id.to_string()))?;
        let haystack = frame.to_gray();

        let mut best: Option<(CorrelationPeak, u32, u32)> = None;
        let mut best_seen = f64::NEG_INFINITY;
        for template in templates {
            let (width, height) = template.image.dimensions();
            if width > haystack.width() || height > haystack.height() {
                tracing::trace!(
                    asset_id,
                    scale = template.scale,
                    "template larger than region, scale skipped"
                );
                continue;
            }
            let Some(peak) = self.correlator.best_match(&haystack, &template.image) else {
                continue;
            };
            if !peak.score.is_finite() {
                continue;
            }
            best_seen = best_seen.max(peak.score);
            let better = best.map_or(true, |(b, _, _)| peak.score > b.score);
            if peak.score >= threshold && better {
                best = Some((peak, width, height));
            }
        }

        let Some((peak, width, height)) = best else {
            return Err(if best_seen.is_finite() {
                BackendFailure::no_match(format!(
                    "'{asset_id}' best {best_seen:.2} < {threshold:.2}"
                ))
            } else {
                BackendFailure::no_match(format!("'{asset_id}' does not fit the region"))
            });
        };

        let geometry = frame.geometry();
        let origin = self
            .transformer
            .frame_pixel_to_screen(f64::from(peak.x), f64::from(peak.y), &geometry)?;
        let bbox = BoundingBox::from_origin(
            origin,
            transform::physical_to_logical(f64::from(width), frame.dpi_scale()),
            transform::physical_to_logical(f64::from(height), frame.dpi_scale()),
        );
        let detection = match self.mode {
            TemplateMode::Standard => Detection {
                point: origin,
                anchor: Anchor::TopLeft,
                bbox: Some(bbox),
                confidence: peak.score,
            },
            TemplateMode::Legacy => Detection::center(bbox.center(), peak.score).with_bbox(bbox),
        };
        tracing::debug!(
            asset_id,
            confidence = detection.confidence,
            point = %detection.point,
            "template matched"
        );
        Ok(detection)
    }
}

impl Recognizer for TemplateMatcher {
    fn backend(&self) -> Backend {
        match self.mode {
            TemplateMode::Standard => Backend::Template,
            TemplateMode::Legacy => Backend::LegacyTemplate,
        }
    }

    fn locate(
        &mut self,
        request: &RecognitionRequest,
        frame: &Frame,
    ) -> Result<Detection, BackendFailure> {
        let asset_id = request
            .asset()
            .ok_or_else(|| BackendFailure::AssetMissing("request has no asset id".to_string()))?;
        let threshold = match self.mode {
            TemplateMode::Standard => request.template_confidence().unwrap_or(self.threshold),
            TemplateMode::Legacy => self.threshold,
        };
        self.match_frame(asset_id, frame, threshold)
    }

    fn teardown(&mut self) {
        self.cache.clear();
    }
}

fn load_gray(path: &Path) -> Result<GrayImage, BackendFailure> {
    image::open(path).map(|img| img.to_luma8()).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "unreadable reference image");
        BackendFailure::AssetMissing(format!("{}: {e}", path.display()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::geometry::{Point, SearchRegion};
    use image::{Luma, RgbaImage};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Scores keyed by needle width; records every needle size it saw.
    struct ScriptedCorrelator {
        peaks: HashMap<u32, CorrelationPeak>,
        seen: Rc<RefCell<Vec<u32>>>,
    }

    impl Correlator for ScriptedCorrelator {
        fn best_match(&self, _haystack: &GrayImage, needle: &GrayImage) -> Option<CorrelationPeak> {
            self.seen.borrow_mut().push(needle.width());
            self.peaks.get(&needle.width()).copied()
        }
    }

    fn peak(x: u32, y: u32, score: f64) -> CorrelationPeak {
        CorrelationPeak { x, y, score }
    }

    fn write_asset(dir: &TempDir, name: &str, width: u32, height: u32) {
        GrayImage::from_pixel(width, height, Luma([128]))
            .save(dir.path().join(name))
            .unwrap();
    }

    fn blank_frame(width: u32, height: u32) -> Frame {
        Frame::new(
            RgbaImage::new(width, height),
            SearchRegion::new(0, 0, i64::from(width), i64::from(height)).unwrap(),
            1.0,
        )
    }

    fn scripted(
        dir: &TempDir,
        peaks: &[(u32, CorrelationPeak)],
    ) -> (TemplateMatcher, Rc<RefCell<Vec<u32>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let matcher = TemplateMatcher::new(dir.path()).with_correlator(Box::new(ScriptedCorrelator {
            peaks: peaks.iter().copied().collect(),
            seen: Rc::clone(&seen),
        }));
        (matcher, seen)
    }

    fn noise(width: u32, height: u32) -> GrayImage {
        let mut state: u32 = 0x1234_5678;
        GrayImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            Luma([(state >> 24) as u8])
        })
    }

    mod scale_tests {
        use super::*;

        #[test]
        fn test_reference_match_reports_top_left_and_size() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "login.png", 50, 50);
            let (mut matcher, _) = scripted(&dir, &[(50, peak(120, 80, 0.82))]);

            let detection = matcher
                .match_frame("login", &blank_frame(400, 300), 0.7)
                .unwrap();
            assert_eq!(detection.point, Point::new(120.0, 80.0));
            assert_eq!(detection.anchor, Anchor::TopLeft);
            assert_eq!(detection.size(), Some((50.0, 50.0)));
            assert!((detection.confidence - 0.82).abs() < 1e-9);
        }

        #[test]
        fn test_highest_scale_wins_and_ties_keep_earliest() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "icon.png", 100, 100);
            // 100 -> 1.0, 95 -> 0.95, 105 -> 1.05, 90 -> 0.9, 110 -> 1.1
            let (mut matcher, seen) = scripted(
                &dir,
                &[
                    (100, peak(1, 1, 0.75)),
                    (95, peak(2, 2, 0.91)),
                    (105, peak(3, 3, 0.91)),
                    (90, peak(4, 4, 0.6)),
                    (110, peak(5, 5, 0.88)),
                ],
            );
            let detection = matcher
                .match_frame("icon", &blank_frame(400, 300), 0.7)
                .unwrap();
            assert_eq!(detection.point, Point::new(2.0, 2.0));
            assert_eq!(detection.size(), Some((95.0, 95.0)));
            assert_eq!(*seen.borrow(), vec![100, 95, 105, 90, 110]);
        }

        #[test]
        fn test_below_threshold_is_no_match() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "icon.png", 20, 20);
            let (mut matcher, _) = scripted(&dir, &[(20, peak(0, 0, 0.69))]);
            let err = matcher
                .match_frame("icon", &blank_frame(100, 100), 0.7)
                .unwrap_err();
            assert!(matches!(err, BackendFailure::NoMatch(_)));
        }

        #[test]
        fn test_oversized_scales_are_skipped() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "wide.png", 100, 20);
            let (mut matcher, seen) = scripted(&dir, &[(95, peak(0, 0, 0.9))]);
            let detection = matcher
                .match_frame("wide", &blank_frame(100, 50), 0.7)
                .unwrap();
            assert_eq!(detection.size(), Some((95.0, 19.0)));
            assert_eq!(*seen.borrow(), vec![100, 95, 90]);
        }

        #[test]
        fn test_legacy_uses_native_scale_and_center() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "old.png", 40, 20);
            let seen = Rc::new(RefCell::new(Vec::new()));
            let mut matcher = TemplateMatcher::legacy(dir.path(), "/nonexistent").with_correlator(
                Box::new(ScriptedCorrelator {
                    peaks: [(40, peak(10, 10, 0.85))].into_iter().collect(),
                    seen: Rc::clone(&seen),
                }),
            );
            assert_eq!(matcher.backend(), Backend::LegacyTemplate);
            let threshold = matcher.threshold();
            let detection = matcher
                .match_frame("old", &blank_frame(200, 200), threshold)
                .unwrap();
            assert_eq!(detection.anchor, Anchor::Center);
            assert_eq!(detection.point, Point::new(30.0, 20.0));
            assert_eq!(*seen.borrow(), vec![40]);
        }

        #[test]
        fn test_region_offset_and_dpi() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "btn.png", 40, 40);
            let (mut matcher, _) = scripted(&dir, &[(40, peak(100, 60, 0.95))]);
            let frame = Frame::new(
                RgbaImage::new(400, 400),
                SearchRegion::new(500, 300, 200, 200).unwrap(),
                2.0,
            );
            let detection = matcher.match_frame("btn", &frame, 0.7).unwrap();
            assert_eq!(detection.point, Point::new(550.0, 330.0));
            assert_eq!(detection.size(), Some((20.0, 20.0)));
            assert_eq!(detection.click_point(), Point::new(560.0, 340.0));
        }
    }

    mod asset_tests {
        use super::*;

        #[test]
        fn test_missing_asset() {
            let dir = TempDir::new().unwrap();
            let mut matcher = TemplateMatcher::new(dir.path());
            let err = matcher
                .match_frame("ghost", &blank_frame(10, 10), 0.7)
                .unwrap_err();
            assert!(matches!(err, BackendFailure::AssetMissing(_)));
            assert!(!err.backend_ran());
        }

        #[test]
        fn test_extension_lookup_and_legacy_fallback_root() {
            let main = TempDir::new().unwrap();
            let legacy = TempDir::new().unwrap();
            write_asset(&main, "shared.jpg", 8, 8);
            write_asset(&legacy, "old.png", 8, 8);

            let matcher = TemplateMatcher::legacy(legacy.path(), main.path());
            assert_eq!(
                matcher.resolve_asset("shared"),
                Some(main.path().join("shared.jpg"))
            );
            assert_eq!(
                matcher.resolve_asset("old.png"),
                Some(legacy.path().join("old.png"))
            );
        }

        #[test]
        fn test_scaled_templates_are_built_once_per_asset() {
            let dir = TempDir::new().unwrap();
            write_asset(&dir, "icon.png", 100, 100);
            let (mut matcher, seen) = scripted(&dir, &[(95, peak(2, 2, 0.9))]);

            matcher.match_frame("icon", &blank_frame(400, 300), 0.7).unwrap();
            assert_eq!(matcher.cached_templates(), TEMPLATE_SCALES.len());

            // Later polls never touch the file again
            std::fs::remove_file(dir.path().join("icon.png")).unwrap();
            for _ in 0..3 {
                matcher.match_frame("icon", &blank_frame(400, 300), 0.7).unwrap();
            }
            assert_eq!(matcher.cached_templates(), TEMPLATE_SCALES.len());
            assert_eq!(seen.borrow().len(), 4 * TEMPLATE_SCALES.len());
            assert_eq!(&seen.borrow()[15..], &[100, 95, 105, 90, 110]);

            matcher.teardown();
            assert_eq!(matcher.cached_templates(), 0);
        }

        #[test]
        fn test_request_without_asset_is_skipped() {
            let dir = TempDir::new().unwrap();
            let mut matcher = TemplateMatcher::new(dir.path());
            let request = RecognitionRequest::builder().label("OK").build().unwrap();
            let err = matcher.locate(&request, &blank_frame(10, 10)).unwrap_err();
            assert!(matches!(err, BackendFailure::AssetMissing(_)));
        }
    }

    mod ncc_tests {
        use super::*;

        #[test]
        fn test_real_correlation_finds_crop() {
            let dir = TempDir::new().unwrap();
            let screen = noise(120, 100);
            image::imageops::crop_imm(&screen, 37, 41, 20, 20)
                .to_image()
                .save(dir.path().join("patch.png"))
                .unwrap();

            let rgba = image::DynamicImage::ImageLuma8(screen).to_rgba8();
            let frame = Frame::new(rgba, SearchRegion::new(0, 0, 120, 100).unwrap(), 1.0);
            let mut matcher = TemplateMatcher::new(dir.path());
            let detection = matcher.match_frame("patch", &frame, 0.7).unwrap();
            assert_eq!(detection.point, Point::new(37.0, 41.0));
            assert!(detection.confidence > 0.99);
        }

        #[test]
        fn test_needle_larger_than_haystack() {
            let result = NccCorrelator.best_match(&noise(10, 10), &noise(11, 5));
            assert!(result.is_none());
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_never_below_threshold(
                scores in proptest::collection::vec(0.0f64..1.0, 5),
                threshold in 0.0f64..1.0,
            ) {
                let dir = TempDir::new().unwrap();
                write_asset(&dir, "t.png", 100, 100);
                let widths = [100u32, 95, 105, 90, 110];
                let peaks: Vec<_> = widths
                    .iter()
                    .zip(&scores)
                    .map(|(w, s)| (*w, peak(0, 0, *s)))
                    .collect();
                let (mut matcher, _) = scripted(&dir, &peaks);
                if let Ok(detection) = matcher.match_frame("t", &blank_frame(200, 200), threshold) {
                    prop_assert!(detection.confidence >= threshold);
                }
            }
        }
    }
}
