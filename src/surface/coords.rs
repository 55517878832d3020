//! Conversions between page units, the minimum-zoom display and the zoomed view
//!
//! Page space has its origin at the bottom-left corner. Display and view
//! space are device pixels with the origin at the top-left, so every
//! page/display conversion flips the y axis.
//!
//! Text space is the y-down page space produced by text extraction: page
//! units measured from the top-left corner.

use super::geometry::{IRect, PointF, Size, SizeF};
use super::request::SurfaceError;

/// Display scale that fits a page inside its parent viewport
#[must_use]
pub fn fit_scale(page: SizeF, parent: Size) -> f32 {
    (parent.width as f32 / page.width).min(parent.height as f32 / page.height)
}

/// Page size at the given scale, truncated to whole pixels
#[must_use]
pub fn scaled_page_size(page: SizeF, scale: f32) -> Size {
    Size::new(
        (page.width * scale).max(0.0) as u32,
        (page.height * scale).max(0.0) as u32,
    )
}

/// Placement of the zoomed page view inside the parent viewport
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    /// Top-left corner of the page view in parent device pixels
    pub origin: PointF,
    /// Current view size divided by the minimum-zoom display size
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            origin: PointF::new(0.0, 0.0),
            zoom: 1.0,
        }
    }

    #[must_use]
    pub const fn new(origin: PointF, zoom: f32) -> Self {
        Self { origin, zoom }
    }

    /// Derive the transform from the view's on-screen rectangle
    #[must_use]
    pub fn from_view_area(view_area: IRect, display: Size) -> Self {
        let zoom = if display.width == 0 {
            1.0
        } else {
            view_area.width() as f32 / display.width as f32
        };
        Self {
            origin: PointF::new(view_area.left as f32, view_area.top as f32),
            zoom: if zoom.is_finite() && zoom > 0.0 {
                zoom
            } else {
                1.0
            },
        }
    }
}

/// Pure mapping between the coordinate spaces of one page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    page_size: SizeF,
    display_size: Size,
    source_scale: f32,
}

impl CoordinateMapper {
    /// Fit `page_size` into `parent` and build the mapper for the result
    pub fn fit(page_size: SizeF, parent: Size) -> Result<Self, SurfaceError> {
        if !page_size.is_valid() {
            return Err(SurfaceError::InvalidPageSize {
                width: page_size.width,
                height: page_size.height,
            });
        }
        let source_scale = fit_scale(page_size, parent);
        let display_size = scaled_page_size(page_size, source_scale);
        if display_size.is_empty() {
            return Err(SurfaceError::EmptyBuffer);
        }
        Ok(Self {
            page_size,
            display_size,
            source_scale,
        })
    }

    #[must_use]
    pub fn page_size(&self) -> SizeF {
        self.page_size
    }

    #[must_use]
    pub fn display_size(&self) -> Size {
        self.display_size
    }

    #[must_use]
    pub fn source_scale(&self) -> f32 {
        self.source_scale
    }

    /// Page point to minimum-zoom display pixels
    #[must_use]
    pub fn page_to_screen(&self, page: PointF) -> PointF {
        let dw = self.display_size.width as f32;
        let dh = self.display_size.height as f32;
        PointF::new(
            page.x * dw / self.page_size.width,
            (self.page_size.height - page.y) * dh / self.page_size.height,
        )
    }

    /// Page point to parent device pixels through the current view
    #[must_use]
    pub fn page_to_view(&self, page: PointF, view: &ViewTransform) -> PointF {
        self.display_to_view(self.page_to_screen(page), view)
    }

    /// Parent device pixels to page units
    #[must_use]
    pub fn screen_to_page(&self, screen: PointF, view: &ViewTransform) -> PointF {
        let display = self.view_to_display(screen, view);
        let percent_x = display.x / self.display_size.width as f32;
        let percent_y = display.y / self.display_size.height as f32;
        PointF::new(
            percent_x * self.page_size.width,
            (1.0 - percent_y) * self.page_size.height,
        )
    }

    /// Parent device pixels to minimum-zoom display pixels
    #[must_use]
    pub fn view_to_display(&self, screen: PointF, view: &ViewTransform) -> PointF {
        PointF::new(
            (screen.x - view.origin.x) / view.zoom,
            (screen.y - view.origin.y) / view.zoom,
        )
    }

    /// Minimum-zoom display pixels to parent device pixels
    #[must_use]
    pub fn display_to_view(&self, display: PointF, view: &ViewTransform) -> PointF {
        PointF::new(
            view.origin.x + display.x * view.zoom,
            view.origin.y + display.y * view.zoom,
        )
    }

    /// Parent device pixels to y-down text space
    #[must_use]
    pub fn view_to_text(&self, screen: PointF, view: &ViewTransform) -> PointF {
        let scale = self.source_scale * view.zoom;
        PointF::new(
            (screen.x - view.origin.x) / scale,
            (screen.y - view.origin.y) / scale,
        )
    }

    /// Size in page units to minimum-zoom display pixels
    #[must_use]
    pub fn scaled_size(&self, width: f32, height: f32) -> (f32, f32) {
        (
            width * self.display_size.width as f32 / self.page_size.width,
            height * self.display_size.height as f32 / self.page_size.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::fit(SizeF::new(1000.0, 1500.0), Size::new(500, 800)).unwrap()
    }

    #[test]
    fn fit_uses_min_scale() {
        let m = mapper();
        assert!((m.source_scale() - 0.5).abs() < f32::EPSILON);
        assert_eq!(m.display_size(), Size::new(500, 750));
    }

    #[test]
    fn fit_rejects_degenerate_pages() {
        assert!(matches!(
            CoordinateMapper::fit(SizeF::new(0.0, 10.0), Size::new(100, 100)),
            Err(SurfaceError::InvalidPageSize { .. })
        ));
        assert!(matches!(
            CoordinateMapper::fit(SizeF::new(10.0, 10.0), Size::new(0, 100)),
            Err(SurfaceError::EmptyBuffer)
        ));
    }

    #[test]
    fn page_origin_maps_to_bottom_left() {
        let m = mapper();
        let p = m.page_to_screen(PointF::new(0.0, 0.0));
        assert!((p.x - 0.0).abs() < EPS);
        assert!((p.y - 750.0).abs() < EPS);

        let top_right = m.page_to_screen(PointF::new(1000.0, 1500.0));
        assert!((top_right.x - 500.0).abs() < EPS);
        assert!(top_right.y.abs() < EPS);
    }

    #[test]
    fn round_trip_through_zoomed_view() {
        let m = mapper();
        let views = [
            ViewTransform::identity(),
            ViewTransform::new(PointF::new(-120.0, -340.0), 2.0),
            ViewTransform::new(PointF::new(35.5, 12.25), 3.7),
        ];
        // Deterministic pseudo-random walk over the page
        let mut seed: u32 = 0x9E37_79B9;
        for view in &views {
            for _ in 0..200 {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let x = (seed >> 8) as f32 / (1u32 << 24) as f32 * 1000.0;
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let y = (seed >> 8) as f32 / (1u32 << 24) as f32 * 1500.0;

                let page = PointF::new(x, y);
                let back = m.screen_to_page(m.page_to_view(page, view), view);
                assert!((back.x - page.x).abs() < EPS, "x {page:?} -> {back:?}");
                assert!((back.y - page.y).abs() < EPS, "y {page:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn view_to_text_divides_by_total_scale() {
        let m = mapper();
        let view = ViewTransform::new(PointF::new(10.0, 20.0), 2.0);
        let t = m.view_to_text(PointF::new(110.0, 220.0), &view);
        assert!((t.x - 100.0).abs() < EPS);
        assert!((t.y - 200.0).abs() < EPS);
    }

    #[test]
    fn display_and_view_are_inverse() {
        let m = mapper();
        let view = ViewTransform::new(PointF::new(-40.0, 15.0), 2.5);
        let display = PointF::new(123.0, 456.0);
        let back = m.view_to_display(m.display_to_view(display, &view), &view);
        assert!((back.x - display.x).abs() < EPS);
        assert!((back.y - display.y).abs() < EPS);
    }

    #[test]
    fn transform_from_view_area() {
        let view = ViewTransform::from_view_area(IRect::new(-250, -10, 750, 1490), Size::new(500, 750));
        assert!((view.zoom - 2.0).abs() < f32::EPSILON);
        assert_eq!(view.origin, PointF::new(-250.0, -10.0));
    }
}
