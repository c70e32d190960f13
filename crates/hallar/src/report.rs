//! Reporting collaborators.
//!
//! A [`Reporter`] is told about every pointer action and every resolved
//! recognition. [`ScreenshotReporter`] turns those into annotated PNG
//! evidence; [`MemoryReporter`] keeps them in memory.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::capture::ScreenCapture;
use crate::geometry::{BoundingBox, Point, SearchRegion};
use crate::matcher::Backend;
use crate::result::HallarResult;

const BOX_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);
const POINT_COLOR: Rgba<u8> = Rgba([230, 0, 0, 255]);
const CROSS_HALF: f32 = 8.0;
const CLICK_CONTEXT_PX: i64 = 200;

/// A resolved recognition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    /// Asset id or label
    pub target: String,
    /// Click point in screen-absolute logical pixels
    pub point: Point,
    /// Element size, when known
    pub size: Option<(f64, f64)>,
    /// Backend that resolved the request
    pub backend: Backend,
    /// Region that was searched
    pub region: SearchRegion,
    /// Element bounds, when known
    pub bbox: Option<BoundingBox>,
}

/// Receives audit events
pub trait Reporter {
    /// A pointer action was sent to `point`
    fn record_click(&mut self, point: Point, label: &str);

    /// A request was resolved
    fn record_recognition(&mut self, event: &RecognitionEvent);
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    /// Click points with their labels
    pub clicks: Vec<(Point, String)>,
    /// Recognition events
    pub recognitions: Vec<RecognitionEvent>,
}

impl Reporter for MemoryReporter {
    fn record_click(&mut self, point: Point, label: &str) {
        self.clicks.push((point, label.to_string()));
    }

    fn record_recognition(&mut self, event: &RecognitionEvent) {
        self.recognitions.push(event.clone());
    }
}

/// Writes annotated screenshots into a directory.
pub struct ScreenshotReporter {
    capture: Box<dyn ScreenCapture>,
    dir: PathBuf,
    sequence: u32,
    written: Vec<PathBuf>,
}

impl std::fmt::Debug for ScreenshotReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotReporter")
            .field("dir", &self.dir)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl ScreenshotReporter {
    /// Reporter writing into `dir`, created if needed
    pub fn new(capture: Box<dyn ScreenCapture>, dir: impl Into<PathBuf>) -> HallarResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            capture,
            dir,
            sequence: 0,
            written: Vec::new(),
        })
    }

    /// Output directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn save(
        &mut self,
        kind: &str,
        name: &str,
        region: &SearchRegion,
        point: Point,
        bbox: Option<BoundingBox>,
    ) -> HallarResult<PathBuf> {
        let frame = self.capture.capture(region)?;
        let mut image = frame.image().clone();
        let scale = frame.dpi_scale();
        let origin = *frame.region();
        let to_px = |p: Point| {
            (
                ((p.x - f64::from(origin.left())) * scale) as f32,
                ((p.y - f64::from(origin.top())) * scale) as f32,
            )
        };
        if let Some(bbox) = bbox {
            let (x0, y0) = to_px(Point::new(bbox.x_min, bbox.y_min));
            let width = (bbox.width() * scale).round().max(1.0) as u32;
            let height = (bbox.height() * scale).round().max(1.0) as u32;
            draw_hollow_rect_mut(
                &mut image,
                Rect::at(x0.round() as i32, y0.round() as i32).of_size(width, height),
                BOX_COLOR,
            );
        }
        draw_cross(&mut image, to_px(point));

        self.sequence += 1;
        let path = self
            .dir
            .join(format!("{:04}_{kind}_{}.png", self.sequence, sanitize(name)));
        image
            .save(&path)
            .map_err(|e| crate::result::HallarError::ImageProcessing {
                message: format!("Failed to write {}: {e}", path.display()),
            })?;
        self.written.push(path.clone());
        Ok(path)
    }
}

impl Reporter for ScreenshotReporter {
    fn record_click(&mut self, point: Point, label: &str) {
        let half = CLICK_CONTEXT_PX / 2;
        let region = match SearchRegion::new(
            (point.x.round() as i32).saturating_sub(half as i32),
            (point.y.round() as i32).saturating_sub(half as i32),
            CLICK_CONTEXT_PX,
            CLICK_CONTEXT_PX,
        ) {
            Ok(region) => region,
            Err(e) => {
                tracing::warn!(error = %e, "click evidence skipped");
                return;
            }
        };
        match self.save("click", label, &region, point, None) {
            Ok(path) => tracing::debug!(path = %path.display(), "click evidence written"),
            Err(e) => tracing::warn!(error = %e, "click evidence skipped"),
        }
    }

    fn record_recognition(&mut self, event: &RecognitionEvent) {
        let name = format!("{}_{}", event.target, event.backend);
        match self.save("found", &name, &event.region, event.point, event.bbox) {
            Ok(path) => tracing::debug!(path = %path.display(), "recognition evidence written"),
            Err(e) => tracing::warn!(error = %e, "recognition evidence skipped"),
        }
    }
}

fn draw_cross(image: &mut RgbaImage, (x, y): (f32, f32)) {
    draw_line_segment_mut(image, (x - CROSS_HALF, y), (x + CROSS_HALF, y), POINT_COLOR);
    draw_line_segment_mut(image, (x, y - CROSS_HALF), (x, y + CROSS_HALF), POINT_COLOR);
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect()
}
