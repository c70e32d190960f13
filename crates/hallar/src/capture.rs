//! Screen capture.
//!
//! A [`Frame`] is one captured search region: the pixels as the OS returned
//! them (physical, possibly HiDPI) plus the logical region they cover and the
//! DPI scale relating the two.

use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use crate::geometry::{SearchRegion, Size};
use crate::result::{HallarError, HallarResult};
use crate::transform::{self, FrameGeometry};

/// One captured search region
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
    region: SearchRegion,
    dpi_scale: f64,
}

impl Frame {
    /// Wrap a capture of `region` taken at `dpi_scale`
    #[must_use]
    pub const fn new(image: RgbaImage, region: SearchRegion, dpi_scale: f64) -> Self {
        Self {
            image,
            region,
            dpi_scale,
        }
    }

    /// Captured pixels
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Logical region the pixels cover
    #[must_use]
    pub const fn region(&self) -> &SearchRegion {
        &self.region
    }

    /// Captured pixels per logical pixel
    #[must_use]
    pub const fn dpi_scale(&self) -> f64 {
        self.dpi_scale
    }

    /// Pixel size of the capture
    #[must_use]
    pub fn pixel_size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    /// Geometry for a backend that works on the capture as-is
    #[must_use]
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.region, self.pixel_size(), self.dpi_scale)
    }

    /// Grayscale copy for correlation
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// PNG-encode the capture
    pub fn to_png(&self) -> HallarResult<Vec<u8>> {
        encode_png(&self.image)
    }
}

/// PNG-encode an RGBA image
pub fn encode_png(image: &RgbaImage) -> HallarResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| HallarError::ImageProcessing {
            message: format!("PNG encoding failed: {e}"),
        })?;
    Ok(buffer.into_inner())
}

/// Source of screen pixels
pub trait ScreenCapture {
    /// Capture a logical screen region
    fn capture(&self, region: &SearchRegion) -> HallarResult<Frame>;
}

/// Crop a logical region out of a full-screen capture.
///
/// `origin` is the logical screen position of the capture's top-left pixel.
/// The region is clipped to the capture; the clipped region is returned with
/// the pixels.
pub fn crop_logical(
    screen: &RgbaImage,
    origin: (i32, i32),
    dpi_scale: f64,
    region: &SearchRegion,
) -> HallarResult<(RgbaImage, SearchRegion)> {
    let to_px = |logical: f64| transform::logical_to_physical(logical, dpi_scale).round();
    let x0 = to_px(f64::from(region.left() - origin.0)).max(0.0);
    let y0 = to_px(f64::from(region.top() - origin.1)).max(0.0);
    let x1 = to_px(region.right() - f64::from(origin.0)).min(f64::from(screen.width()));
    let y1 = to_px(region.bottom() - f64::from(origin.1)).min(f64::from(screen.height()));

    if x1 <= x0 || y1 <= y0 {
        return Err(HallarError::capture(format!(
            "region {region} lies outside the captured screen"
        )));
    }
    let to_logical = |px: f64| transform::physical_to_logical(px, dpi_scale);
    let left = f64::from(origin.0) + to_logical(x0);
    let top = f64::from(origin.1) + to_logical(y0);
    let clipped = SearchRegion::new(
        left.round() as i32,
        top.round() as i32,
        (f64::from(origin.0) + to_logical(x1) - left).round().max(1.0) as i64,
        (f64::from(origin.1) + to_logical(y1) - top).round().max(1.0) as i64,
    )?;
    let image = image::imageops::crop_imm(
        screen,
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )
    .to_image();
    Ok((image, clipped))
}

/// Serves crops of a pre-recorded screenshot.
///
/// Used for offline replay and tests.
#[derive(Debug, Clone)]
pub struct StaticScreen {
    image: RgbaImage,
    origin: (i32, i32),
    dpi_scale: f64,
}

impl StaticScreen {
    /// Screenshot whose top-left pixel sits at the logical screen origin
    #[must_use]
    pub const fn new(image: RgbaImage) -> Self {
        Self {
            image,
            origin: (0, 0),
            dpi_scale: 1.0,
        }
    }

    /// Load a screenshot file
    pub fn from_file(path: impl AsRef<Path>) -> HallarResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| HallarError::ImageProcessing {
                message: format!("Failed to load screenshot {}: {e}", path.display()),
            })?
            .to_rgba8();
        Ok(Self::new(image))
    }

    /// Place the screenshot at a logical screen position
    #[must_use]
    pub const fn with_origin(mut self, left: i32, top: i32) -> Self {
        self.origin = (left, top);
        self
    }

    /// Declare the screenshot as taken at a DPI scale
    #[must_use]
    pub const fn with_dpi_scale(mut self, dpi_scale: f64) -> Self {
        self.dpi_scale = dpi_scale;
        self
    }

    /// Logical region covered by the screenshot
    pub fn bounds(&self) -> HallarResult<SearchRegion> {
        SearchRegion::new(
            self.origin.0,
            self.origin.1,
            transform::physical_to_logical(f64::from(self.image.width()), self.dpi_scale).round()
                as i64,
            transform::physical_to_logical(f64::from(self.image.height()), self.dpi_scale).round()
                as i64,
        )
    }
}

impl ScreenCapture for StaticScreen {
    fn capture(&self, region: &SearchRegion) -> HallarResult<Frame> {
        let (image, clipped) = crop_logical(&self.image, self.origin, self.dpi_scale, region)?;
        Ok(Frame::new(image, clipped, self.dpi_scale))
    }
}

/// Live capture of the monitor containing the region.
#[cfg(feature = "os")]
#[derive(Debug, Clone, Copy, Default)]
pub struct XcapScreen;

#[cfg(feature = "os")]
impl ScreenCapture for XcapScreen {
    fn capture(&self, region: &SearchRegion) -> HallarResult<Frame> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| HallarError::capture(format!("Failed to enumerate monitors: {e}")))?;

        let contains = |m: &xcap::Monitor| {
            region.left() >= m.x()
                && region.top() >= m.y()
                && i64::from(region.left()) < i64::from(m.x()) + i64::from(m.width())
                && i64::from(region.top()) < i64::from(m.y()) + i64::from(m.height())
        };
        let monitor = match monitors.iter().position(contains) {
            Some(idx) => &monitors[idx],
            None => monitors
                .iter()
                .find(|m| m.is_primary())
                .or_else(|| monitors.first())
                .ok_or_else(|| HallarError::capture("No monitors found"))?,
        };

        let screen = monitor
            .capture_image()
            .map_err(|e| HallarError::capture(format!("Monitor capture failed: {e}")))?;
        let dpi = transform::dpi_scale(
            Size::new(screen.width(), screen.height()),
            Size::new(monitor.width(), monitor.height()),
        );
        tracing::debug!(
            monitor = monitor.name(),
            dpi_scale = dpi,
            %region,
            "captured monitor"
        );
        let (image, clipped) = crop_logical(&screen, (monitor.x(), monitor.y()), dpi, region)?;
        Ok(Frame::new(image, clipped, dpi))
    }
}
