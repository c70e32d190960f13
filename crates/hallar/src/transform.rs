//! Coordinate normalization.
//!
//! Recognition backends report positions in whatever frame they looked at:
//! ratios of a downscaled copy, physical pixels of a HiDPI capture, offsets
//! relative to the search region. Everything funnels through
//! [`CoordinateTransformer`] before it becomes a screen-absolute logical
//! point, and the out-of-region policy is applied in exactly one place.
//!
//! # Ratio vs. pixel ambiguity
//!
//! [`CoordinateTransformer::resolve`] treats a value strictly inside (0, 1) as
//! a ratio and anything else as a pixel offset. A genuine half-pixel offset is
//! therefore read as "middle of the frame". Backends that always report pixels
//! use [`CoordinateTransformer::frame_pixel_to_screen`], which skips the
//! heuristic.

use crate::geometry::{Point, SearchRegion, Size};
use crate::result::{BackendFailure, HallarResult};

/// Default distance a point may fall outside its region before it is rejected
pub const DEFAULT_TOLERANCE_PX: f64 = 20.0;

/// Interpretation of a single raw axis value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisValue {
    /// Fraction of the frame dimension
    Ratio(f64),
    /// Pixel offset inside the frame
    Pixel(f64),
}

impl AxisValue {
    /// Apply the (0, 1) heuristic
    #[must_use]
    pub fn classify(value: f64) -> Self {
        if value > 0.0 && value < 1.0 {
            Self::Ratio(value)
        } else {
            Self::Pixel(value)
        }
    }

    /// Pixel offset within a frame of the given extent
    #[must_use]
    pub fn to_pixels(self, extent: u32) -> f64 {
        match self {
            Self::Ratio(r) => r * f64::from(extent),
            Self::Pixel(p) => p,
        }
    }
}

/// Everything needed to map a backend's frame back onto the screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    /// Screen-absolute logical region that was captured
    pub region: SearchRegion,
    /// Pixel size of the image the backend operated on
    pub frame_size: Size,
    /// Pixel size of the original capture
    pub original_size: Size,
    /// Captured pixels per logical pixel
    pub dpi_scale: f64,
}

impl FrameGeometry {
    /// Geometry for a backend that saw the capture unchanged
    #[must_use]
    pub const fn new(region: SearchRegion, original_size: Size, dpi_scale: f64) -> Self {
        Self {
            region,
            frame_size: original_size,
            original_size,
            dpi_scale,
        }
    }

    /// Same capture, but the backend saw a resized copy
    #[must_use]
    pub const fn resized(mut self, frame_size: Size) -> Self {
        self.frame_size = frame_size;
        self
    }
}

/// Converts between ratio, physical, logical and screen-absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformer {
    tolerance_px: f64,
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_PX)
    }
}

impl CoordinateTransformer {
    /// Create a transformer with the given out-of-region tolerance
    #[must_use]
    pub const fn new(tolerance_px: f64) -> Self {
        Self { tolerance_px }
    }

    /// Out-of-region tolerance in logical pixels
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance_px
    }

    /// Resolve a raw backend coordinate, applying the ratio heuristic per axis.
    pub fn resolve(&self, x: f64, y: f64, geometry: &FrameGeometry) -> Result<Point, BackendFailure> {
        if !x.is_finite() || !y.is_finite() {
            return Err(BackendFailure::OutOfBounds(format!(
                "non-finite coordinate ({x}, {y})"
            )));
        }
        let frame_x = AxisValue::classify(x).to_pixels(geometry.frame_size.width);
        let frame_y = AxisValue::classify(y).to_pixels(geometry.frame_size.height);
        self.frame_pixel_to_screen(frame_x, frame_y, geometry)
    }

    /// Map a pixel position in the backend's frame to the screen.
    pub fn frame_pixel_to_screen(
        &self,
        x: f64,
        y: f64,
        geometry: &FrameGeometry,
    ) -> Result<Point, BackendFailure> {
        let candidate = self.frame_pixel_to_screen_unchecked(x, y, geometry);
        self.accept(candidate, &geometry.region)
    }

    /// Frame pixel to screen point without the region policy.
    #[must_use]
    pub fn frame_pixel_to_screen_unchecked(&self, x: f64, y: f64, geometry: &FrameGeometry) -> Point {
        let rescale_x = axis_rescale(geometry.original_size.width, geometry.frame_size.width);
        let rescale_y = axis_rescale(geometry.original_size.height, geometry.frame_size.height);
        let logical_x = physical_to_logical(x * rescale_x, geometry.dpi_scale);
        let logical_y = physical_to_logical(y * rescale_y, geometry.dpi_scale);
        Point::new(
            f64::from(geometry.region.left()) + logical_x,
            f64::from(geometry.region.top()) + logical_y,
        )
    }

    /// Apply the out-of-region policy: reject beyond tolerance, clamp within it.
    pub fn accept(&self, point: Point, region: &SearchRegion) -> Result<Point, BackendFailure> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(BackendFailure::OutOfBounds(format!("non-finite point {point}")));
        }
        let outside = region.distance_outside(point);
        if outside > self.tolerance_px {
            return Err(BackendFailure::OutOfBounds(format!(
                "{point} lies {outside:.0}px outside {region} (tolerance {:.0}px)",
                self.tolerance_px
            )));
        }
        Ok(region.clamp(point))
    }

    /// Ratio position inside a region to a screen point.
    #[must_use]
    pub fn ratio_to_screen(&self, ratio_x: f64, ratio_y: f64, region: &SearchRegion) -> Point {
        let (dx, dy) = self.ratio_to_offset(ratio_x, ratio_y, region);
        Point::new(f64::from(region.left()) + dx, f64::from(region.top()) + dy)
    }

    /// Ratio of a region's extent expressed as a pixel offset.
    #[must_use]
    pub fn ratio_to_offset(&self, ratio_x: f64, ratio_y: f64, region: &SearchRegion) -> (f64, f64) {
        (
            ratio_x * f64::from(region.width()),
            ratio_y * f64::from(region.height()),
        )
    }

    /// Screen point to ratio of a region.
    #[must_use]
    pub fn screen_to_ratio(&self, point: Point, region: &SearchRegion) -> (f64, f64) {
        (
            (point.x - f64::from(region.left())) / f64::from(region.width()),
            (point.y - f64::from(region.top())) / f64::from(region.height()),
        )
    }

    /// Sub-rectangle of a region given as ratios of its extent.
    pub fn ratio_rect_to_region(
        &self,
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        within: &SearchRegion,
    ) -> HallarResult<SearchRegion> {
        let origin = self.ratio_to_screen(left, top, within);
        let (w, h) = self.ratio_to_offset(width, height, within);
        SearchRegion::new(
            origin.x.round() as i32,
            origin.y.round() as i32,
            w.round() as i64,
            h.round() as i64,
        )
    }
}

/// Captured pixels per logical pixel.
///
/// Falls back to 1.0 when the logical size is unknown.
#[must_use]
pub fn dpi_scale(captured: Size, logical: Size) -> f64 {
    if logical.width == 0 || captured.width == 0 {
        return 1.0;
    }
    f64::from(captured.width) / f64::from(logical.width)
}

/// Physical pixels to logical pixels
#[must_use]
pub fn physical_to_logical(value: f64, dpi_scale: f64) -> f64 {
    if dpi_scale > 0.0 {
        value / dpi_scale
    } else {
        value
    }
}

/// Logical pixels to physical pixels
#[must_use]
pub fn logical_to_physical(value: f64, dpi_scale: f64) -> f64 {
    if dpi_scale > 0.0 {
        value * dpi_scale
    } else {
        value
    }
}

fn axis_rescale(original: u32, resized: u32) -> f64 {
    if resized == 0 {
        1.0
    } else {
        f64::from(original) / f64::from(resized)
    }
}
