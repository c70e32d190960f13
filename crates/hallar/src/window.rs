//! Target window discovery.
//!
//! The application under test is identified by title heuristics: any
//! configured pattern contained in the title (case-insensitive), no exclusion
//! pattern contained in it, not minimized, and at least the minimum size.
//! When several windows qualify the largest one wins.

use serde::{Deserialize, Serialize};

use crate::geometry::{SearchRegion, Size};
use crate::result::{HallarError, HallarResult};

/// Default minimum window width
pub const DEFAULT_MIN_WIDTH: u32 = 200;
/// Default minimum window height
pub const DEFAULT_MIN_HEIGHT: u32 = 150;

/// One top-level window as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    /// Window title
    pub title: String,
    /// Owning application name
    pub app_name: String,
    /// Left edge in logical pixels
    pub left: i32,
    /// Top edge in logical pixels
    pub top: i32,
    /// Width (may be zero or negative while the window is being created)
    pub width: i64,
    /// Height (may be zero or negative while the window is being created)
    pub height: i64,
    /// Whether the window is minimized
    pub minimized: bool,
}

impl WindowInfo {
    /// Create a visible window
    #[must_use]
    pub fn new(title: impl Into<String>, left: i32, top: i32, width: i64, height: i64) -> Self {
        Self {
            title: title.into(),
            app_name: String::new(),
            left,
            top,
            width,
            height,
            minimized: false,
        }
    }

    /// Set the owning application name
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Mark the window minimized
    #[must_use]
    pub const fn minimized(mut self) -> Self {
        self.minimized = true;
        self
    }

    /// Window bounds as a search region
    pub fn region(&self) -> HallarResult<SearchRegion> {
        SearchRegion::new(self.left, self.top, self.width, self.height)
    }

    fn area(&self) -> i64 {
        self.width.max(0).saturating_mul(self.height.max(0))
    }
}

/// Enumerates top-level windows
pub trait WindowSource {
    /// Current top-level windows
    fn windows(&self) -> HallarResult<Vec<WindowInfo>>;
}

/// Fixed window list.
#[derive(Debug, Clone, Default)]
pub struct StaticWindows {
    windows: Vec<WindowInfo>,
}

impl StaticWindows {
    /// Serve the given windows
    #[must_use]
    pub const fn new(windows: Vec<WindowInfo>) -> Self {
        Self { windows }
    }

    /// A single window covering a region
    #[must_use]
    pub fn covering(title: impl Into<String>, region: &SearchRegion) -> Self {
        Self::new(vec![WindowInfo::new(
            title,
            region.left(),
            region.top(),
            i64::from(region.width()),
            i64::from(region.height()),
        )])
    }
}

impl WindowSource for StaticWindows {
    fn windows(&self) -> HallarResult<Vec<WindowInfo>> {
        Ok(self.windows.clone())
    }
}

/// Live window enumeration
#[cfg(feature = "os")]
#[derive(Debug, Clone, Copy, Default)]
pub struct XcapWindows;

#[cfg(feature = "os")]
impl WindowSource for XcapWindows {
    fn windows(&self) -> HallarResult<Vec<WindowInfo>> {
        let windows = xcap::Window::all()
            .map_err(|e| HallarError::capture(format!("Failed to enumerate windows: {e}")))?;
        Ok(windows
            .iter()
            .map(|w| WindowInfo {
                title: w.title().to_string(),
                app_name: w.app_name().to_string(),
                left: w.x(),
                top: w.y(),
                width: i64::from(w.width()),
                height: i64::from(w.height()),
                minimized: w.is_minimized(),
            })
            .collect())
    }
}

/// Finds the application under test among the top-level windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLocator {
    titles: Vec<String>,
    exclude_titles: Vec<String>,
    min_size: Size,
}

impl WindowLocator {
    /// Match windows whose title contains any of `titles`.
    ///
    /// An empty title list matches every window.
    #[must_use]
    pub fn new<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            titles: titles.into_iter().map(Into::into).collect(),
            exclude_titles: Vec::new(),
            min_size: Size::new(DEFAULT_MIN_WIDTH, DEFAULT_MIN_HEIGHT),
        }
    }

    /// Reject windows whose title contains any of `patterns`
    #[must_use]
    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_titles = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Minimum usable window size
    #[must_use]
    pub const fn with_min_size(mut self, min_size: Size) -> Self {
        self.min_size = min_size;
        self
    }

    /// Configured title patterns, for error messages
    #[must_use]
    pub fn titles_display(&self) -> String {
        if self.titles.is_empty() {
            "<any>".to_string()
        } else {
            self.titles.join(", ")
        }
    }

    /// Whether a window's title qualifies
    #[must_use]
    pub fn title_matches(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        let wanted = self.titles.is_empty()
            || self
                .titles
                .iter()
                .any(|t| title.contains(&t.to_lowercase()));
        wanted
            && !self
                .exclude_titles
                .iter()
                .any(|t| title.contains(&t.to_lowercase()))
    }

    /// Whether a window is ready to be searched
    #[must_use]
    pub fn is_usable(&self, window: &WindowInfo) -> bool {
        !window.minimized
            && window.width >= i64::from(self.min_size.width)
            && window.height >= i64::from(self.min_size.height)
    }

    /// Largest qualifying window, if any
    pub fn find(&self, source: &dyn WindowSource) -> HallarResult<Option<WindowInfo>> {
        let mut best: Option<WindowInfo> = None;
        for window in source.windows()? {
            if !self.title_matches(&window.title) || !self.is_usable(&window) {
                continue;
            }
            if best.as_ref().map_or(true, |b| window.area() > b.area()) {
                best = Some(window);
            }
        }
        Ok(best)
    }

    /// Search region of the target window, `None` while it is not ready.
    ///
    /// Enumeration errors are logged and read as "not ready".
    pub fn acquire(&self, source: &dyn WindowSource) -> Option<SearchRegion> {
        match self.find(source) {
            Ok(Some(window)) => match window.region() {
                Ok(region) => Some(region),
                Err(e) => {
                    tracing::debug!(title = %window.title, error = %e, "window not ready");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(titles = %self.titles_display(), "no matching window");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "window enumeration failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn desktop() -> StaticWindows {
        StaticWindows::new(vec![
            WindowInfo::new("Terminal", 0, 0, 1920, 1080),
            WindowInfo::new("Acme Client - Login", 100, 200, 800, 600),
            WindowInfo::new("Acme Client - Main", 50, 50, 1200, 900),
            WindowInfo::new("Acme Client Updater", 10, 10, 1600, 1000),
            WindowInfo::new("Acme Client tooltip", 10, 10, 120, 40),
        ])
    }

    #[test]
    fn test_largest_match_wins() {
        let locator = WindowLocator::new(["acme client"]).with_exclusions(["updater"]);
        let window = locator.find(&desktop()).unwrap().unwrap();
        assert_eq!(window.title, "Acme Client - Main");
    }

    #[test]
    fn test_exclusions_apply_case_insensitively() {
        let locator = WindowLocator::new(["ACME"]).with_exclusions(["UPDATER", "main"]);
        let window = locator.find(&desktop()).unwrap().unwrap();
        assert_eq!(window.title, "Acme Client - Login");
    }

    #[test]
    fn test_small_and_minimized_windows_are_skipped() {
        let source = StaticWindows::new(vec![
            WindowInfo::new("Acme tooltip", 0, 0, 199, 400),
            WindowInfo::new("Acme hidden", 0, 0, 1000, 1000).minimized(),
        ]);
        let locator = WindowLocator::new(["acme"]);
        assert!(locator.find(&source).unwrap().is_none());
        assert!(locator.acquire(&source).is_none());
    }

    #[test]
    fn test_acquire_returns_region() {
        let locator = WindowLocator::new(["login"]);
        let region = locator.acquire(&desktop()).unwrap();
        assert_eq!(region, SearchRegion::new(100, 200, 800, 600).unwrap());
    }

    #[test]
    fn test_empty_titles_match_anything() {
        let region = SearchRegion::new(0, 0, 640, 480).unwrap();
        let locator = WindowLocator::new(Vec::<String>::new());
        assert_eq!(locator.titles_display(), "<any>");
        assert_eq!(
            locator.acquire(&StaticWindows::covering("replay", &region)),
            Some(region)
        );
    }

    #[test]
    fn test_zero_sized_window_is_not_ready() {
        let window = WindowInfo::new("Acme", 0, 0, 0, 600);
        assert!(window.region().is_err());
        let locator = WindowLocator::new(["acme"]).with_min_size(Size::new(0, 0));
        assert!(locator
            .acquire(&StaticWindows::new(vec![window]))
            .is_none());
    }
}
