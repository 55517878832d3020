//! Tap translation, event callbacks and the double-tap guard

use std::sync::atomic::{AtomicBool, Ordering};

use super::coords::{CoordinateMapper, ViewTransform};
use super::geometry::{PointF, RectF};
use super::overlay::OverlayId;

/// A tap that landed outside the page view
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GestureError {
    #[error("tap outside the page horizontally")]
    OutsideHorizontal,

    #[error("tap outside the page vertically")]
    OutsideVertical,
}

impl GestureError {
    /// Stable code for hosts that match on strings
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OutsideHorizontal => "ERROR_OUTSIDE_HORIZONTAL",
            Self::OutsideVertical => "ERROR_OUTSIDE_VERTICAL",
        }
    }
}

/// Where a tap landed, in minimum-zoom display pixels and in page units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TapLocation {
    pub page: usize,
    pub view_x: f32,
    pub view_y: f32,
    pub pdf_x: f32,
    pub pdf_y: f32,
}

impl TapLocation {
    #[must_use]
    pub fn display_point(&self) -> PointF {
        PointF::new(self.view_x, self.view_y)
    }

    #[must_use]
    pub fn page_point(&self) -> PointF {
        PointF::new(self.pdf_x, self.pdf_y)
    }
}

/// Host callbacks for gestures on a page
pub trait PageEvents: Send {
    fn single_tap(&self, _location: &TapLocation) {}

    fn long_press(&self, _location: &TapLocation) {}

    fn double_tap(&self, _location: &TapLocation) {}

    fn error(&self, _error: GestureError) {}
}

/// What a gesture handler did
#[derive(Clone, Debug, PartialEq)]
pub enum GestureOutcome {
    /// Position delivered to the event callback
    Reported(TapLocation),
    /// Tap outside the page view
    Rejected(GestureError),
    OverlayRemoved(OverlayId),
    SignaturePlaced(OverlayId),
    /// Nothing to do for this tap
    Ignored,
    /// Another gesture is still being handled
    Busy,
}

/// Per-surface single-flight guard for gesture handlers
#[derive(Debug, Default)]
pub struct GestureGuard {
    busy: AtomicBool,
}

impl GestureGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another ticket is alive
    #[must_use]
    pub fn try_acquire(&self) -> Option<GestureTicket<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GestureTicket { guard: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop, on every exit path
#[derive(Debug)]
pub struct GestureTicket<'a> {
    guard: &'a GestureGuard,
}

impl Drop for GestureTicket<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

/// Page view rectangle in parent device pixels
#[must_use]
pub fn view_rect(mapper: &CoordinateMapper, view: &ViewTransform) -> RectF {
    let display = mapper.display_size();
    RectF::new(
        view.origin.x,
        view.origin.y,
        view.origin.x + display.width as f32 * view.zoom,
        view.origin.y + display.height as f32 * view.zoom,
    )
}

/// Bounds violations of `point`, horizontal first. Edges count as inside.
#[must_use]
pub fn outside_errors(rect: &RectF, point: PointF) -> Vec<GestureError> {
    let mut errors = Vec::new();
    if point.x < rect.left || point.x > rect.right {
        errors.push(GestureError::OutsideHorizontal);
    }
    if point.y < rect.top || point.y > rect.bottom {
        errors.push(GestureError::OutsideVertical);
    }
    errors
}

/// Translate a device-space point on the page view
#[must_use]
pub fn translate_tap(
    mapper: &CoordinateMapper,
    page: usize,
    point: PointF,
    view: &ViewTransform,
) -> TapLocation {
    let display = mapper.view_to_display(point, view);
    let pdf = mapper.screen_to_page(point, view);
    TapLocation {
        page,
        view_x: display.x,
        view_y: display.y,
        pdf_x: pdf.x,
        pdf_y: pdf.y,
    }
}

#[cfg(test)]
mod tests {
    use super::super::geometry::{Size, SizeF};
    use super::*;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::fit(SizeF::new(1000.0, 1500.0), Size::new(500, 800)).unwrap()
    }

    #[test]
    fn ticket_resets_guard_on_drop() {
        let guard = GestureGuard::new();
        {
            let _ticket = guard.try_acquire().unwrap();
            assert!(guard.is_busy());
            assert!(guard.try_acquire().is_none());
        }
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn ticket_resets_guard_after_panic() {
        let guard = GestureGuard::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ticket = guard.try_acquire().unwrap();
            panic!("handler failed");
        }));
        assert!(result.is_err());
        assert!(!guard.is_busy());
    }

    #[test]
    fn translate_tap_at_zoom() {
        let m = mapper();
        let view = ViewTransform::new(PointF::new(-100.0, 0.0), 2.0);
        let loc = translate_tap(&m, 4, PointF::new(400.0, 750.0), &view);

        assert_eq!(loc.page, 4);
        assert!((loc.view_x - 250.0).abs() < 1e-3);
        assert!((loc.view_y - 375.0).abs() < 1e-3);
        assert!((loc.pdf_x - 500.0).abs() < 1e-3);
        assert!((loc.pdf_y - 750.0).abs() < 1e-3);
    }

    #[test]
    fn outside_errors_reports_each_axis() {
        let m = mapper();
        let rect = view_rect(&m, &ViewTransform::identity());
        assert_eq!(rect, RectF::new(0.0, 0.0, 500.0, 750.0));

        assert!(outside_errors(&rect, PointF::new(500.0, 750.0)).is_empty());
        assert_eq!(
            outside_errors(&rect, PointF::new(-1.0, 780.0)),
            vec![GestureError::OutsideHorizontal, GestureError::OutsideVertical]
        );
        assert_eq!(
            outside_errors(&rect, PointF::new(10.0, 760.0)),
            vec![GestureError::OutsideVertical]
        );
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(GestureError::OutsideHorizontal.code(), "ERROR_OUTSIDE_HORIZONTAL");
        assert_eq!(GestureError::OutsideVertical.code(), "ERROR_OUTSIDE_VERTICAL");
    }
}
