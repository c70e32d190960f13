//! Recognition requests.
//!
//! A [`RecognitionRequest`] describes one element: how it can be recognised
//! (reference image, text label), where to click when recognition fails
//! (fallback ratio), where to look, and what to do once it is found. Requests
//! are immutable after [`RecognitionRequestBuilder::build`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::geometry::{Point, SearchRegion};
use crate::interaction::ClickKind;
use crate::result::{HallarError, HallarResult};
use crate::strategy::Strategy;
use crate::transform::CoordinateTransformer;

/// Default overall time budget per request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default sleep between poll iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// What a fallback ratio is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAnchor {
    /// Window top-left; ratios grow right and down
    #[default]
    Window,
    /// Window bottom edge; the y ratio grows upward from the bottom
    WindowBottom,
    /// Previous click; ratios of the window size, may be negative
    LastClick,
}

impl std::str::FromStr for FallbackAnchor {
    type Err = HallarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "window" => Ok(Self::Window),
            "bottom" | "window-bottom" | "window_bottom" => Ok(Self::WindowBottom),
            "last-click" | "last_click" | "relative" => Ok(Self::LastClick),
            other => Err(HallarError::invalid_request(format!(
                "unknown fallback anchor '{other}'"
            ))),
        }
    }
}

/// Last-resort ratio position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackCoordinate {
    /// Horizontal ratio of the window width
    pub ratio_x: f64,
    /// Vertical ratio of the window height
    pub ratio_y: f64,
    /// Reference point
    pub anchor: FallbackAnchor,
}

impl FallbackCoordinate {
    /// Screen point for this fallback.
    ///
    /// `LastClick` without a previous click is measured from the window.
    #[must_use]
    pub fn resolve(
        &self,
        transformer: &CoordinateTransformer,
        window: &SearchRegion,
        last_click: Option<Point>,
    ) -> Point {
        match (self.anchor, last_click) {
            (FallbackAnchor::Window, _) | (FallbackAnchor::LastClick, None) => {
                transformer.ratio_to_screen(self.ratio_x, self.ratio_y, window)
            }
            (FallbackAnchor::WindowBottom, _) => {
                let (dx, dy) = transformer.ratio_to_offset(self.ratio_x, self.ratio_y, window);
                Point::new(f64::from(window.left()) + dx, window.bottom() - dy)
            }
            (FallbackAnchor::LastClick, Some(last)) => {
                let (dx, dy) = transformer.ratio_to_offset(self.ratio_x, self.ratio_y, window);
                Point::new(last.x + dx, last.y + dy)
            }
        }
    }
}

/// Caller-chosen search area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionOverride {
    /// Fixed screen rectangle
    Absolute(SearchRegion),
    /// Sub-rectangle of the window given as ratios
    WindowRatio {
        /// Left edge ratio
        left: f64,
        /// Top edge ratio
        top: f64,
        /// Width ratio
        width: f64,
        /// Height ratio
        height: f64,
    },
}

impl RegionOverride {
    /// Concrete region for the current window bounds
    pub fn resolve(
        &self,
        transformer: &CoordinateTransformer,
        window: &SearchRegion,
    ) -> HallarResult<SearchRegion> {
        match *self {
            Self::Absolute(region) => Ok(region),
            Self::WindowRatio {
                left,
                top,
                width,
                height,
            } => transformer.ratio_rect_to_region(left, top, width, height, window),
        }
    }
}

/// One element to find.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionRequest {
    asset: Option<String>,
    label: Option<String>,
    fallback: Option<FallbackCoordinate>,
    region: Option<RegionOverride>,
    timeout: Duration,
    poll_interval: Duration,
    action: Option<ClickKind>,
    offset: (i32, i32),
    strategy: Strategy,
    template_confidence: Option<f64>,
}

impl RecognitionRequest {
    /// Start building a request
    #[must_use]
    pub fn builder() -> RecognitionRequestBuilder {
        RecognitionRequestBuilder::default()
    }

    /// Reference image id
    #[must_use]
    pub fn asset(&self) -> Option<&str> {
        self.asset.as_deref()
    }

    /// Free-text label
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Fallback ratio coordinate
    #[must_use]
    pub const fn fallback(&self) -> Option<&FallbackCoordinate> {
        self.fallback.as_ref()
    }

    /// Search-region override
    #[must_use]
    pub const fn region(&self) -> Option<&RegionOverride> {
        self.region.as_ref()
    }

    /// Overall time budget
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sleep between poll iterations
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Pointer action to perform once resolved
    #[must_use]
    pub const fn action(&self) -> Option<ClickKind> {
        self.action
    }

    /// Pixel offset applied to the click point
    #[must_use]
    pub const fn offset(&self) -> (i32, i32) {
        self.offset
    }

    /// Backend priority preset
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Template threshold override
    #[must_use]
    pub const fn template_confidence(&self) -> Option<f64> {
        self.template_confidence
    }

    /// Name used in logs, statistics and errors
    #[must_use]
    pub fn target(&self) -> &str {
        self.asset
            .as_deref()
            .or(self.label.as_deref())
            .unwrap_or("<fallback>")
    }

    /// Same request as a pure existence check: no fallback, no pointer action
    #[must_use]
    pub fn for_verification(&self) -> Self {
        Self {
            fallback: None,
            action: None,
            ..self.clone()
        }
    }
}

/// Builder for [`RecognitionRequest`]
#[derive(Debug, Clone)]
pub struct RecognitionRequestBuilder {
    request: RecognitionRequest,
}

impl Default for RecognitionRequestBuilder {
    fn default() -> Self {
        Self {
            request: RecognitionRequest {
                asset: None,
                label: None,
                fallback: None,
                region: None,
                timeout: DEFAULT_TIMEOUT,
                poll_interval: DEFAULT_POLL_INTERVAL,
                action: None,
                offset: (0, 0),
                strategy: Strategy::Default,
                template_confidence: None,
            },
        }
    }
}

impl RecognitionRequestBuilder {
    /// Reference image id, resolved under the asset root
    #[must_use]
    pub fn asset(mut self, asset: impl Into<String>) -> Self {
        self.request.asset = Some(asset.into());
        self
    }

    /// Text shown on, or natural-language description of, the element
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.request.label = Some(label.into());
        self
    }

    /// Fallback ratio coordinate
    #[must_use]
    pub const fn fallback(mut self, ratio_x: f64, ratio_y: f64, anchor: FallbackAnchor) -> Self {
        self.request.fallback = Some(FallbackCoordinate {
            ratio_x,
            ratio_y,
            anchor,
        });
        self
    }

    /// Search a fixed screen rectangle
    #[must_use]
    pub const fn region(mut self, region: SearchRegion) -> Self {
        self.request.region = Some(RegionOverride::Absolute(region));
        self
    }

    /// Search a ratio sub-rectangle of the window
    #[must_use]
    pub const fn window_ratio_region(mut self, left: f64, top: f64, width: f64, height: f64) -> Self {
        self.request.region = Some(RegionOverride::WindowRatio {
            left,
            top,
            width,
            height,
        });
        self
    }

    /// Overall time budget
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    /// Sleep between poll iterations
    #[must_use]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.request.poll_interval = poll_interval;
        self
    }

    /// Pointer action to perform once resolved
    #[must_use]
    pub const fn action(mut self, action: ClickKind) -> Self {
        self.request.action = Some(action);
        self
    }

    /// Pixel offset applied to the click point
    #[must_use]
    pub const fn offset(mut self, dx: i32, dy: i32) -> Self {
        self.request.offset = (dx, dy);
        self
    }

    /// Backend priority preset
    #[must_use]
    pub const fn strategy(mut self, strategy: Strategy) -> Self {
        self.request.strategy = strategy;
        self
    }

    /// Template threshold override
    #[must_use]
    pub const fn template_confidence(mut self, confidence: f64) -> Self {
        self.request.template_confidence = Some(confidence);
        self
    }

    /// Validate and freeze the request
    pub fn build(self) -> HallarResult<RecognitionRequest> {
        let request = self.request;
        if request.asset.is_none() && request.label.is_none() && request.fallback.is_none() {
            return Err(HallarError::invalid_request(
                "request needs an asset, a label or a fallback coordinate",
            ));
        }
        if request.asset.as_deref().is_some_and(str::is_empty)
            || request.label.as_deref().is_some_and(str::is_empty)
        {
            return Err(HallarError::invalid_request("asset and label must not be empty"));
        }
        if let Some(fallback) = &request.fallback {
            let range = if fallback.anchor == FallbackAnchor::LastClick {
                -1.0..=1.0
            } else {
                0.0..=1.0
            };
            if !range.contains(&fallback.ratio_x) || !range.contains(&fallback.ratio_y) {
                return Err(HallarError::invalid_request(format!(
                    "fallback ratio ({}, {}) outside {range:?}",
                    fallback.ratio_x, fallback.ratio_y
                )));
            }
        }
        if let Some(RegionOverride::WindowRatio {
            left,
            top,
            width,
            height,
        }) = request.region
        {
            let unit = 0.0..=1.0;
            if !unit.contains(&left)
                || !unit.contains(&top)
                || !(width > 0.0 && left + width <= 1.0)
                || !(height > 0.0 && top + height <= 1.0)
            {
                return Err(HallarError::invalid_request(format!(
                    "window ratio region ({left}, {top}, {width}x{height}) is not inside the window"
                )));
            }
        }
        if request.timeout.is_zero() {
            return Err(HallarError::invalid_request("timeout must be positive"));
        }
        if let Some(confidence) = request.template_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(HallarError::invalid_request(format!(
                    "template confidence {confidence} outside [0, 1]"
                )));
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = RecognitionRequest::builder()
            .asset("login_button")
            .build()
            .unwrap();
        assert_eq!(request.timeout(), Duration::from_secs(3));
        assert_eq!(request.poll_interval(), Duration::from_millis(150));
        assert_eq!(request.strategy(), Strategy::Default);
        assert_eq!(request.action(), None);
        assert_eq!(request.offset(), (0, 0));
        assert_eq!(request.target(), "login_button");
    }

    #[test]
    fn test_empty_request_is_rejected() {
        assert!(RecognitionRequest::builder().build().is_err());
        assert!(RecognitionRequest::builder().label("").build().is_err());
    }

    #[test]
    fn test_fallback_ratio_range() {
        assert!(RecognitionRequest::builder()
            .fallback(1.2, 0.5, FallbackAnchor::Window)
            .build()
            .is_err());
        assert!(RecognitionRequest::builder()
            .fallback(-0.1, 0.05, FallbackAnchor::LastClick)
            .build()
            .is_ok());
    }

    #[test]
    fn test_window_ratio_region_must_fit() {
        assert!(RecognitionRequest::builder()
            .label("OK")
            .window_ratio_region(0.5, 0.5, 0.6, 0.2)
            .build()
            .is_err());
        assert!(RecognitionRequest::builder()
            .label("OK")
            .window_ratio_region(0.5, 0.5, 0.5, 0.2)
            .build()
            .is_ok());
    }

    #[test]
    fn test_for_verification_strips_fallback_and_action() {
        let request = RecognitionRequest::builder()
            .label("Save")
            .fallback(0.5, 0.5, FallbackAnchor::Window)
            .action(ClickKind::Double)
            .build()
            .unwrap();
        let check = request.for_verification();
        assert!(check.fallback().is_none());
        assert!(check.action().is_none());
        assert_eq!(check.label(), Some("Save"));
    }

    #[test]
    fn test_anchor_parsing() {
        assert_eq!("bottom".parse::<FallbackAnchor>().unwrap(), FallbackAnchor::WindowBottom);
        assert_eq!("last-click".parse::<FallbackAnchor>().unwrap(), FallbackAnchor::LastClick);
        assert!("middle".parse::<FallbackAnchor>().is_err());
    }

    mod fallback_tests {
        use super::*;

        fn window() -> SearchRegion {
            SearchRegion::new(100, 200, 800, 600).unwrap()
        }

        #[test]
        fn test_window_anchor() {
            let fallback = FallbackCoordinate {
                ratio_x: 0.25,
                ratio_y: 0.5,
                anchor: FallbackAnchor::Window,
            };
            let point = fallback.resolve(&CoordinateTransformer::default(), &window(), None);
            assert_eq!(point, Point::new(300.0, 500.0));
        }

        #[test]
        fn test_bottom_anchor() {
            let fallback = FallbackCoordinate {
                ratio_x: 0.5,
                ratio_y: 0.1,
                anchor: FallbackAnchor::WindowBottom,
            };
            let point = fallback.resolve(&CoordinateTransformer::default(), &window(), None);
            assert_eq!(point, Point::new(500.0, 740.0));
        }

        #[test]
        fn test_last_click_anchor() {
            let fallback = FallbackCoordinate {
                ratio_x: 0.1,
                ratio_y: -0.1,
                anchor: FallbackAnchor::LastClick,
            };
            let transformer = CoordinateTransformer::default();
            let point = fallback.resolve(&transformer, &window(), Some(Point::new(400.0, 400.0)));
            assert_eq!(point, Point::new(480.0, 340.0));
        }

        #[test]
        fn test_last_click_without_click_degrades_to_window() {
            let fallback = FallbackCoordinate {
                ratio_x: 0.25,
                ratio_y: 0.5,
                anchor: FallbackAnchor::LastClick,
            };
            let point = fallback.resolve(&CoordinateTransformer::default(), &window(), None);
            assert_eq!(point, Point::new(300.0, 500.0));
        }
    }
}
