//! Screen geometry primitives.
//!
//! All values here are screen-absolute logical pixels unless a name says
//! otherwise. Conversions between ratio, physical and region-relative values
//! live in [`crate::transform`].

use serde::{Deserialize, Serialize};

use crate::result::{HallarError, HallarResult};

/// A point in 2D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Shift by a pixel offset
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + f64::from(dx), self.y + f64::from(dy))
    }

    /// Euclidean distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.0}, {:.0})", self.x, self.y)
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Size {
    /// Create a new size
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box given by its corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x_min: f64,
    /// Top edge
    pub y_min: f64,
    /// Right edge
    pub x_max: f64,
    /// Bottom edge
    pub y_max: f64,
}

impl BoundingBox {
    /// Box from top-left corner and size
    #[must_use]
    pub fn from_origin(origin: Point, width: f64, height: f64) -> Self {
        Self {
            x_min: origin.x,
            y_min: origin.y,
            x_max: origin.x + width,
            y_max: origin.y + height,
        }
    }

    /// Box from two arbitrary corners
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x_min: a.x.min(b.x),
            y_min: a.y.min(b.y),
            x_max: a.x.max(b.x),
            y_max: a.y.max(b.y),
        }
    }

    /// Center of the box
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Box width
    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Box height
    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// The screen-absolute rectangle a backend is restricted to scan.
///
/// Width and height are always positive; a window that would yield an empty
/// region is "not ready" and never becomes a `SearchRegion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRegion {
    left: i32,
    top: i32,
    width: u32,
    height: u32,
}

impl SearchRegion {
    /// Create a region, rejecting empty rectangles
    pub fn new(left: i32, top: i32, width: i64, height: i64) -> HallarResult<Self> {
        if width <= 0 || height <= 0 {
            return Err(HallarError::invalid_region(format!(
                "region ({left}, {top}, {width}x{height}) has no area"
            )));
        }
        let width = u32::try_from(width)
            .map_err(|_| HallarError::invalid_region(format!("width {width} too large")))?;
        let height = u32::try_from(height)
            .map_err(|_| HallarError::invalid_region(format!("height {height} too large")))?;
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// Left edge
    #[must_use]
    pub const fn left(&self) -> i32 {
        self.left
    }

    /// Top edge
    #[must_use]
    pub const fn top(&self) -> i32 {
        self.top
    }

    /// Width in logical pixels
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in logical pixels
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Right edge (exclusive)
    #[must_use]
    pub fn right(&self) -> f64 {
        f64::from(self.left) + f64::from(self.width)
    }

    /// Bottom edge (exclusive)
    #[must_use]
    pub fn bottom(&self) -> f64 {
        f64::from(self.top) + f64::from(self.height)
    }

    /// Size of the region
    #[must_use]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether a point lies inside (edges inclusive)
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= f64::from(self.left)
            && point.x <= self.right()
            && point.y >= f64::from(self.top)
            && point.y <= self.bottom()
    }

    /// Distance from the point to the region, 0 when inside
    #[must_use]
    pub fn distance_outside(&self, point: Point) -> f64 {
        let dx = if point.x < f64::from(self.left) {
            f64::from(self.left) - point.x
        } else if point.x > self.right() {
            point.x - self.right()
        } else {
            0.0
        };
        let dy = if point.y < f64::from(self.top) {
            f64::from(self.top) - point.y
        } else if point.y > self.bottom() {
            point.y - self.bottom()
        } else {
            0.0
        };
        dx.max(dy)
    }

    /// Pull a point onto the region
    #[must_use]
    pub fn clamp(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(f64::from(self.left), self.right()),
            point.y.clamp(f64::from(self.top), self.bottom()),
        )
    }
}

impl std::fmt::Display for SearchRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.left, self.top, self.width, self.height
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rejects_empty() {
        assert!(SearchRegion::new(0, 0, 0, 10).is_err());
        assert!(SearchRegion::new(0, 0, 10, -1).is_err());
        assert!(SearchRegion::new(-50, 10, 1, 1).is_ok());
    }

    #[test]
    fn test_region_contains_and_clamp() {
        let region = SearchRegion::new(100, 200, 800, 600).unwrap();
        assert!(region.contains(Point::new(500.0, 500.0)));
        assert!(region.contains(Point::new(900.0, 800.0)));
        assert!(!region.contains(Point::new(99.0, 500.0)));

        let clamped = region.clamp(Point::new(910.0, 190.0));
        assert_eq!(clamped, Point::new(900.0, 200.0));
    }

    #[test]
    fn test_distance_outside() {
        let region = SearchRegion::new(0, 0, 100, 100).unwrap();
        assert_eq!(region.distance_outside(Point::new(50.0, 50.0)), 0.0);
        assert_eq!(region.distance_outside(Point::new(115.0, 50.0)), 15.0);
        assert_eq!(region.distance_outside(Point::new(-3.0, 130.0)), 30.0);
    }

    #[test]
    fn test_bounding_box_center() {
        let bbox = BoundingBox::from_origin(Point::new(120.0, 80.0), 50.0, 50.0);
        assert_eq!(bbox.center(), Point::new(145.0, 105.0));
        let swapped = BoundingBox::from_corners(Point::new(10.0, 20.0), Point::new(0.0, 0.0));
        assert_eq!(swapped.width(), 10.0);
        assert_eq!(swapped.height(), 20.0);
    }
}
