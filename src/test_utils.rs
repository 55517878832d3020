//! Test helpers: a slow recording renderer with a write-after-cancel
//! detector, and event pumping with a deadline

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::checker::CheckerRenderer;
use crate::surface::{
    CancellationToken, LinkRegion, OverlayStore, PageRenderer, PageSurface, RenderFault,
    RenderRegion, SharedBuffer, Size, SizeF, SurfaceEvent, TextLine,
};

/// One call into the renderer
#[derive(Clone, Debug, PartialEq)]
pub struct RenderCall {
    pub page: usize,
    pub region: RenderRegion,
    pub incremental: bool,
}

/// Renders a checkerboard one row at a time, sleeping between rows, and
/// records every row it writes.
///
/// After [`RecordingRenderer::seal`] every write counts as a late write,
/// which is how tests assert that nothing touches a target once cancel
/// returned.
pub struct RecordingRenderer {
    checker: CheckerRenderer,
    row_delay: Duration,
    sealed: AtomicBool,
    writes: AtomicUsize,
    late_writes: AtomicUsize,
    calls: Mutex<Vec<RenderCall>>,
    next_failure: Mutex<Option<RenderFault>>,
}

impl RecordingRenderer {
    pub fn new(page_size: SizeF, row_delay: Duration) -> Self {
        Self {
            checker: CheckerRenderer::new(page_size),
            row_delay,
            sealed: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            late_writes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            next_failure: Mutex::new(None),
        }
    }

    pub fn with_text(mut self, lines: Vec<TextLine>) -> Self {
        self.checker = self.checker.with_text(lines);
        self
    }

    /// From now on every write is a violation
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn unseal(&self) {
        self.sealed.store(false, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn late_writes(&self) -> usize {
        self.late_writes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fail the next render call with `fault`
    pub fn fail_next(&self, fault: RenderFault) {
        *self
            .next_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    fn rasterize(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
        incremental: bool,
    ) -> Result<(), RenderFault> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RenderCall {
                page,
                region: *region,
                incremental,
            });
        if let Some(fault) = self
            .next_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(fault);
        }

        let size = target.size();
        for y in 0..size.height {
            if token.is_cancelled() {
                return Ok(());
            }
            let written = target.write(|image| {
                let view_y = region.area.top + y as i32;
                for x in 0..size.width {
                    let view_x = region.area.left + x as i32;
                    let px = self.checker.pixel(
                        page,
                        view_x,
                        view_y,
                        region.view_size.width,
                        region.view_size.height,
                    );
                    image.put_pixel(x, y, px);
                }
            });
            if written.is_none() {
                return Err(RenderFault::BufferReleased);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.sealed.load(Ordering::SeqCst) {
                self.late_writes.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(self.row_delay);
        }
        Ok(())
    }
}

impl PageRenderer for RecordingRenderer {
    fn render_patch(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.rasterize(page, target, region, token, false)
    }

    fn update_page(
        &self,
        page: usize,
        target: &SharedBuffer,
        view_size: Size,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.rasterize(page, target, &RenderRegion::whole(view_size), token, true)
    }

    fn update_patch(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.rasterize(page, target, region, token, true)
    }

    fn extract_links(&self, page: usize) -> Vec<LinkRegion> {
        self.checker.extract_links(page)
    }

    fn extract_text(&self, page: usize) -> Vec<TextLine> {
        self.checker.extract_text(page)
    }
}

/// Pump `surface` until an event matches `done`; returns every event seen.
/// Panics after `timeout`.
pub fn pump_until(
    surface: &mut PageSurface,
    store: &dyn OverlayStore,
    timeout: Duration,
    done: impl Fn(&SurfaceEvent) -> bool,
) -> Vec<SurfaceEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        let events = surface.wait_and_pump(store, Duration::from_millis(50));
        let finished = events.iter().any(&done);
        seen.extend(events);
        if finished {
            return seen;
        }
    }
    panic!("no matching event within {timeout:?}, saw {seen:?}");
}

/// Pump until neither render tasks nor lookups are outstanding
pub fn pump_idle(
    surface: &mut PageSurface,
    store: &dyn OverlayStore,
    timeout: Duration,
) -> Vec<SurfaceEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = surface.pump(store);
    while surface.has_pending_work() && Instant::now() < deadline {
        seen.extend(surface.wait_and_pump(store, Duration::from_millis(50)));
    }
    seen
}
