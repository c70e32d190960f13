//! Pointer actions.
//!
//! The executor is the only place a recognised point becomes an OS event:
//! offset, pointer-space conversion and rounding happen here and the result
//! is handed back as a [`ResolvedAction`].

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use crate::geometry::Point;
use crate::report::Reporter;
use crate::result::{HallarError, HallarResult};
use crate::transform;

/// Pointer action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickKind {
    /// Left click
    Single,
    /// Left double click
    Double,
    /// Right click
    Right,
}

impl std::str::FromStr for ClickKind {
    type Err = HallarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "click" | "left" => Ok(Self::Single),
            "double" => Ok(Self::Double),
            "right" => Ok(Self::Right),
            other => Err(HallarError::invalid_request(format!(
                "unknown click kind '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ClickKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Single => "single",
            Self::Double => "double",
            Self::Right => "right",
        })
    }
}

/// Coordinate space a pointer driver expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerSpace {
    /// Logical (DPI-independent) pixels
    #[default]
    Logical,
    /// Physical pixels, logical × DPI scale
    Physical,
}

/// Injects pointer events
pub trait PointerDriver {
    /// Space in which `move_to` coordinates are given
    fn space(&self) -> PointerSpace;

    /// Move the pointer
    fn move_to(&mut self, x: i32, y: i32) -> HallarResult<()>;

    /// Click at the current position
    fn click(&mut self, kind: ClickKind) -> HallarResult<()>;
}

/// Pointer event seen by a [`DryRunPointer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    /// Pointer moved
    Move {
        /// X in driver space
        x: i32,
        /// Y in driver space
        y: i32,
    },
    /// Click performed
    Click(ClickKind),
}

/// Shared log of dry-run pointer events
pub type PointerLog = Rc<RefCell<Vec<PointerEvent>>>;

/// Records pointer events instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct DryRunPointer {
    space: PointerSpace,
    log: PointerLog,
}

impl DryRunPointer {
    /// Dry-run driver in logical space
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dry-run driver in the given space
    #[must_use]
    pub fn with_space(space: PointerSpace) -> Self {
        Self {
            space,
            log: PointerLog::default(),
        }
    }

    /// Handle to the recorded events
    #[must_use]
    pub fn log(&self) -> PointerLog {
        Rc::clone(&self.log)
    }
}

impl PointerDriver for DryRunPointer {
    fn space(&self) -> PointerSpace {
        self.space
    }

    fn move_to(&mut self, x: i32, y: i32) -> HallarResult<()> {
        tracing::info!(x, y, "dry run: move pointer");
        self.log.borrow_mut().push(PointerEvent::Move { x, y });
        Ok(())
    }

    fn click(&mut self, kind: ClickKind) -> HallarResult<()> {
        tracing::info!(%kind, "dry run: click");
        self.log.borrow_mut().push(PointerEvent::Click(kind));
        Ok(())
    }
}

/// OS pointer events through enigo
#[cfg(feature = "os")]
pub struct EnigoPointer {
    enigo: enigo::Enigo,
    space: PointerSpace,
}

#[cfg(feature = "os")]
impl std::fmt::Debug for EnigoPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnigoPointer")
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "os")]
impl EnigoPointer {
    /// Connect to the OS input system
    pub fn new(space: PointerSpace) -> HallarResult<Self> {
        let enigo = enigo::Enigo::new(&enigo::Settings::default())
            .map_err(|e| HallarError::input(format!("Failed to connect input system: {e}")))?;
        Ok(Self { enigo, space })
    }
}

#[cfg(feature = "os")]
impl PointerDriver for EnigoPointer {
    fn space(&self) -> PointerSpace {
        self.space
    }

    fn move_to(&mut self, x: i32, y: i32) -> HallarResult<()> {
        use enigo::Mouse as _;
        self.enigo
            .move_mouse(x, y, enigo::Coordinate::Abs)
            .map_err(|e| HallarError::input(format!("move to ({x}, {y}) failed: {e}")))
    }

    fn click(&mut self, kind: ClickKind) -> HallarResult<()> {
        use enigo::{Button, Direction, Mouse as _};
        let (button, count) = match kind {
            ClickKind::Single => (Button::Left, 1),
            ClickKind::Double => (Button::Left, 2),
            ClickKind::Right => (Button::Right, 1),
        };
        for _ in 0..count {
            self.enigo
                .button(button, Direction::Click)
                .map_err(|e| HallarError::input(format!("{kind} click failed: {e}")))?;
        }
        Ok(())
    }
}

/// The coordinate a pointer action was actually sent to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedAction {
    logical: Point,
    device_x: i32,
    device_y: i32,
    space: PointerSpace,
    kind: ClickKind,
}

impl ResolvedAction {
    pub(crate) const fn new(
        logical: Point,
        device: (i32, i32),
        space: PointerSpace,
        kind: ClickKind,
    ) -> Self {
        Self {
            logical,
            device_x: device.0,
            device_y: device.1,
            space,
            kind,
        }
    }

    /// Offset-adjusted point in logical screen pixels
    #[must_use]
    pub const fn logical(&self) -> Point {
        self.logical
    }

    /// Rounded coordinate in the driver's space
    #[must_use]
    pub const fn device(&self) -> (i32, i32) {
        (self.device_x, self.device_y)
    }

    /// Driver space
    #[must_use]
    pub const fn space(&self) -> PointerSpace {
        self.space
    }

    /// Action performed
    #[must_use]
    pub const fn kind(&self) -> ClickKind {
        self.kind
    }
}

/// Turns resolved points into pointer actions.
pub struct InteractionExecutor {
    driver: Box<dyn PointerDriver>,
}

impl std::fmt::Debug for InteractionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionExecutor")
            .field("space", &self.driver.space())
            .finish()
    }
}

impl InteractionExecutor {
    /// Executor over a pointer driver
    #[must_use]
    pub fn new(driver: Box<dyn PointerDriver>) -> Self {
        Self { driver }
    }

    /// Executor that only records events
    #[must_use]
    pub fn dry_run() -> (Self, PointerLog) {
        let driver = DryRunPointer::new();
        let log = driver.log();
        (Self::new(Box::new(driver)), log)
    }

    /// Offset, convert and round a point for the driver
    #[must_use]
    pub fn resolve(
        &self,
        point: Point,
        kind: ClickKind,
        offset: (i32, i32),
        dpi_scale: f64,
    ) -> ResolvedAction {
        let logical = point.offset(offset.0, offset.1);
        let space = self.driver.space();
        let (x, y) = match space {
            PointerSpace::Logical => (logical.x, logical.y),
            PointerSpace::Physical => (
                transform::logical_to_physical(logical.x, dpi_scale),
                transform::logical_to_physical(logical.y, dpi_scale),
            ),
        };
        ResolvedAction::new(logical, (x.round() as i32, y.round() as i32), space, kind)
    }

    /// Perform a pointer action at a resolved point
    pub fn execute(
        &mut self,
        point: Point,
        kind: ClickKind,
        offset: (i32, i32),
        dpi_scale: f64,
        label: &str,
        reporter: Option<&mut dyn Reporter>,
    ) -> HallarResult<ResolvedAction> {
        let action = self.resolve(point, kind, offset, dpi_scale);
        let (x, y) = action.device();
        self.driver.move_to(x, y)?;
        self.driver.click(kind)?;
        tracing::info!(label, %kind, x, y, space = ?action.space(), "pointer action");
        if let Some(reporter) = reporter {
            reporter.record_click(action.logical(), label);
        }
        Ok(action)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;

    #[test]
    fn test_offset_applied_in_logical_space() {
        let (mut executor, log) = InteractionExecutor::dry_run();
        let action = executor
            .execute(Point::new(100.4, 200.6), ClickKind::Single, (5, -10), 2.0, "ok", None)
            .unwrap();
        assert_eq!(action.logical(), Point::new(105.4, 190.6));
        assert_eq!(action.device(), (105, 191));
        assert_eq!(
            *log.borrow(),
            vec![
                PointerEvent::Move { x: 105, y: 191 },
                PointerEvent::Click(ClickKind::Single)
            ]
        );
    }

    #[test]
    fn test_physical_space_scales_by_dpi() {
        let driver = DryRunPointer::with_space(PointerSpace::Physical);
        let log = driver.log();
        let mut executor = InteractionExecutor::new(Box::new(driver));
        let action = executor
            .execute(Point::new(100.0, 50.0), ClickKind::Right, (10, 0), 1.5, "menu", None)
            .unwrap();
        assert_eq!(action.device(), (165, 75));
        assert_eq!(action.space(), PointerSpace::Physical);
        assert_eq!(log.borrow()[1], PointerEvent::Click(ClickKind::Right));
    }

    #[test]
    fn test_click_is_reported() {
        let (mut executor, _) = InteractionExecutor::dry_run();
        let mut reporter = MemoryReporter::default();
        executor
            .execute(
                Point::new(10.0, 10.0),
                ClickKind::Double,
                (0, 0),
                1.0,
                "save",
                Some(&mut reporter),
            )
            .unwrap();
        assert_eq!(reporter.clicks, vec![(Point::new(10.0, 10.0), "save".to_string())]);
    }

    #[test]
    fn test_click_kind_parse() {
        assert_eq!("double".parse::<ClickKind>().unwrap(), ClickKind::Double);
        assert_eq!("RIGHT".parse::<ClickKind>().unwrap(), ClickKind::Right);
        assert!("middle".parse::<ClickKind>().is_err());
    }
}
