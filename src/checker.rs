//! Synthetic checkerboard renderer for the demo binary and tests

use image::Rgba;
use log::trace;
use rayon::prelude::*;

use crate::surface::{
    CancellationToken, LinkRegion, PageRenderer, RenderFault, RenderRegion, SharedBuffer, SizeF,
    TextLine,
};

/// Edge of one checker square in page units
pub const DEFAULT_SQUARE: f32 = 50.0;

/// Rows above which rasterization is split across the rayon pool
pub const DEFAULT_PARALLEL_ROWS: u32 = 256;

/// Renders every page as a checkerboard in page space.
///
/// Squares are anchored to the page, so a patch at any zoom lines up with
/// the full-page raster. The light colour is tinted per page to make page
/// switches visible.
#[derive(Clone, Debug)]
pub struct CheckerRenderer {
    page_size: SizeF,
    square: f32,
    dark: Rgba<u8>,
    light: Rgba<u8>,
    parallel_rows: u32,
    text: Vec<TextLine>,
    links: Vec<LinkRegion>,
}

impl CheckerRenderer {
    #[must_use]
    pub fn new(page_size: SizeF) -> Self {
        Self {
            page_size,
            square: DEFAULT_SQUARE,
            dark: Rgba([90, 90, 90, 255]),
            light: Rgba([235, 235, 235, 255]),
            parallel_rows: DEFAULT_PARALLEL_ROWS,
            text: Vec::new(),
            links: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_square(mut self, square: f32) -> Self {
        self.square = square.max(1.0);
        self
    }

    #[must_use]
    pub fn with_parallel_rows(mut self, rows: u32) -> Self {
        self.parallel_rows = rows;
        self
    }

    /// Lines reported by text extraction for every page
    #[must_use]
    pub fn with_text(mut self, lines: Vec<TextLine>) -> Self {
        self.text = lines;
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<LinkRegion>) -> Self {
        self.links = links;
        self
    }

    /// Colour of the view pixel at (`x`, `y`) for a view of `view_w`x`view_h`
    #[must_use]
    pub fn pixel(&self, page: usize, x: i32, y: i32, view_w: u32, view_h: u32) -> Rgba<u8> {
        let unit_x = (x as f32 + 0.5) * self.page_size.width / view_w as f32;
        let unit_y = (y as f32 + 0.5) * self.page_size.height / view_h as f32;
        let col = (unit_x / self.square).floor() as i64;
        let row = (unit_y / self.square).floor() as i64;
        if (col + row) % 2 == 0 {
            self.dark
        } else {
            let tint = (page % 8) as u8 * 2;
            let [r, g, b, a] = self.light.0;
            Rgba([r.saturating_sub(tint), g, b.saturating_sub(tint), a])
        }
    }

    fn fill_row(&self, page: usize, region: &RenderRegion, y: u32, row: &mut [u8]) {
        let view = region.view_size;
        let view_y = region.area.top + y as i32;
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let view_x = region.area.left + x as i32;
            px.copy_from_slice(&self.pixel(page, view_x, view_y, view.width, view.height).0);
        }
    }
}

impl PageRenderer for CheckerRenderer {
    fn render_patch(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        if region.view_size.is_empty() {
            return Err(RenderFault::generic("empty view size"));
        }
        let size = target.size();
        let row_bytes = size.width as usize * 4;
        let parallel = size.height > self.parallel_rows;
        trace!(
            "Checker page {page} area {:?} parallel={parallel}",
            region.area
        );

        target
            .write(|image| {
                let render_row = |(y, row): (usize, &mut [u8])| {
                    if !token.is_cancelled() {
                        self.fill_row(page, region, y as u32, row);
                    }
                };
                if parallel {
                    image
                        .par_chunks_exact_mut(row_bytes)
                        .enumerate()
                        .for_each(render_row);
                } else {
                    image
                        .chunks_exact_mut(row_bytes)
                        .enumerate()
                        .for_each(render_row);
                }
            })
            .ok_or(RenderFault::BufferReleased)
    }

    fn extract_links(&self, _page: usize) -> Vec<LinkRegion> {
        self.links.clone()
    }

    fn extract_text(&self, _page: usize) -> Vec<TextLine> {
        self.text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{BufferLifecycle, IRect, Size};

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn render(renderer: &CheckerRenderer, region: RenderRegion) -> SharedBuffer {
        let target = BufferLifecycle::new(1 << 26, WHITE)
            .allocate(region.area.size())
            .unwrap();
        renderer
            .render_patch(0, &target, &region, &CancellationToken::new())
            .unwrap();
        target
    }

    #[test]
    fn patch_matches_full_page_pixels() {
        let renderer = CheckerRenderer::new(SizeF::new(200.0, 300.0)).with_square(20.0);
        let full = render(&renderer, RenderRegion::whole(Size::new(200, 300)));
        let patch = render(
            &renderer,
            RenderRegion {
                view_size: Size::new(200, 300),
                area: IRect::new(50, 70, 150, 170),
            },
        );

        let full = full.snapshot().unwrap();
        let patch = patch.snapshot().unwrap();
        for (x, y) in [(0, 0), (13, 27), (99, 99)] {
            assert_eq!(patch.get_pixel(x, y), full.get_pixel(x + 50, y + 70));
        }
    }

    #[test]
    fn parallel_and_serial_rows_agree() {
        let page = SizeF::new(400.0, 600.0);
        let region = RenderRegion::whole(Size::new(400, 600));
        let serial = render(&CheckerRenderer::new(page).with_parallel_rows(u32::MAX), region);
        let parallel = render(&CheckerRenderer::new(page).with_parallel_rows(0), region);
        assert_eq!(serial.snapshot(), parallel.snapshot());
    }

    #[test]
    fn cancelled_token_leaves_target_untouched() {
        let renderer = CheckerRenderer::new(SizeF::new(100.0, 100.0));
        let target = BufferLifecycle::new(1 << 20, WHITE)
            .allocate(Size::new(100, 100))
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        renderer
            .render_patch(0, &target, &RenderRegion::whole(Size::new(100, 100)), &token)
            .unwrap();
        assert_eq!(target.read(|img| *img.get_pixel(0, 0)), Some(WHITE));
    }

    #[test]
    fn released_target_is_reported() {
        let renderer = CheckerRenderer::new(SizeF::new(100.0, 100.0));
        let target = BufferLifecycle::new(1 << 20, WHITE)
            .allocate(Size::new(10, 10))
            .unwrap();
        target.release();
        assert_eq!(
            renderer.render_patch(
                0,
                &target,
                &RenderRegion::whole(Size::new(10, 10)),
                &CancellationToken::new()
            ),
            Err(RenderFault::BufferReleased)
        );
    }
}
