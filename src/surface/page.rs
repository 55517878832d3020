//! Page surface - owns the buffers, render tasks and per-page state of one page
//!
//! Every page-visible mutation (buffer swap, overlay compositing,
//! presentation) happens inside [`PageSurface::pump`] on the owner's thread.
//! Render lanes only ever write into buffers that are not presented.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, error, info, trace, warn};

use crate::settings::Settings;

use super::buffer::{BufferLifecycle, BufferStats, SharedBuffer};
use super::coords::{CoordinateMapper, ViewTransform};
use super::geometry::{IRect, PointF, RectF, Size, SizeF};
use super::gesture::{
    GestureGuard, GestureOutcome, PageEvents, TapLocation, outside_errors, translate_tap, view_rect,
};
use super::ink::{DrawingStroke, INK_THICKNESS, Ink};
use super::overlay::{Overlay, OverlayCompositor, OverlayKind, OverlayStore};
use super::renderer::{LinkRegion, PageRenderer, TextLine};
use super::request::{
    RenderFault, RenderRegion, SurfaceError, TaskCompletion, TaskId, TaskStatus, Tier,
};
use super::scheduler::RenderScheduler;
use super::selection::{SelectionBox, TextSelectionEngine};
use super::state::{Command, Effect, Phase, SurfaceState};
use super::tile::{PatchDecision, PatchMode, PatchTile, TileCoordinator};

/// Longest single block inside [`PageSurface::wait_and_pump`]
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Notifications produced by [`PageSurface::pump`]
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceEvent {
    FullPagePresented { page: usize },
    PatchPresented { page: usize, area: IRect },
    PatchDiscarded,
    RenderFailed { tier: Tier, fault: RenderFault },
    TextReady { page: usize },
    LinksReady { page: usize, count: usize },
}

/// Chrome to draw over the page, in page-view pixels (origin at the view's
/// top-left corner)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decorations {
    pub search_boxes: Vec<RectF>,
    pub links: Vec<RectF>,
    pub selection: Vec<RectF>,
    pub item_select_box: Option<RectF>,
    pub strokes: Vec<Vec<PointF>>,
    /// Area covered by all strokes including their thickness
    pub ink_bounds: Option<RectF>,
    pub ink_thickness: f32,
}

#[derive(Clone, Copy, Debug)]
enum LookupKind {
    Text,
    Links,
}

impl LookupKind {
    fn name(self) -> &'static str {
        match self {
            LookupKind::Text => "text",
            LookupKind::Links => "links",
        }
    }
}

enum Lookup {
    Text(Vec<TextLine>),
    Links(Vec<LinkRegion>),
}

struct LookupResult {
    generation: u64,
    page: usize,
    lookup: Lookup,
}

/// A single page shown at minimum zoom plus a high-resolution patch
pub struct PageSurface {
    renderer: Arc<dyn PageRenderer>,
    settings: Settings,
    state: SurfaceState,
    scheduler: RenderScheduler,
    buffers: BufferLifecycle,
    compositor: OverlayCompositor,
    mapper: Option<CoordinateMapper>,

    /// Presented full-page buffer
    front: Option<SharedBuffer>,
    /// Full-page render target, never presented
    back: Option<SharedBuffer>,
    full_task: Option<TaskId>,

    tiles: TileCoordinator,
    /// Target of the in-flight patch render
    patch_target: Option<SharedBuffer>,
    /// Previous tile buffer kept for reuse
    spare_patch: Option<SharedBuffer>,
    patch_task: Option<TaskId>,
    view_area: Option<IRect>,

    lookup_tx: Sender<LookupResult>,
    lookup_rx: Receiver<LookupResult>,
    lookups_in_flight: usize,
    text: Option<Vec<TextLine>>,
    text_requested: bool,
    links: Option<Vec<LinkRegion>>,

    selection: Option<SelectionBox>,
    ink: Ink,
    search_boxes: Vec<RectF>,
    highlight_links: bool,
    item_select_box: Option<RectF>,

    loading_since: Option<Instant>,
    queued: Vec<SurfaceEvent>,
    events: Option<Box<dyn PageEvents>>,
    gesture_guard: Arc<GestureGuard>,
    signature: Option<SharedBuffer>,
}

impl PageSurface {
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>, settings: Settings, parent_size: Size) -> Self {
        let buffers = BufferLifecycle::new(settings.max_buffer_bytes, settings.background_rgba());
        let compositor = OverlayCompositor::new(settings.overlay_filter.filter_type());
        let (lookup_tx, lookup_rx) = flume::unbounded();
        Self {
            renderer,
            settings,
            state: SurfaceState::new(parent_size),
            scheduler: RenderScheduler::new(),
            buffers,
            compositor,
            mapper: None,
            front: None,
            back: None,
            full_task: None,
            tiles: TileCoordinator::new(),
            patch_target: None,
            spare_patch: None,
            patch_task: None,
            view_area: None,
            lookup_tx,
            lookup_rx,
            lookups_in_flight: 0,
            text: None,
            text_requested: false,
            links: None,
            selection: None,
            ink: Ink::new(),
            search_boxes: Vec::new(),
            highlight_links: false,
            item_select_box: None,
            loading_since: None,
            queued: Vec::new(),
            events: None,
            gesture_guard: Arc::new(GestureGuard::new()),
            signature: None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Show `page` of `size` page units and start rendering it
    pub fn set_page(&mut self, page: usize, size: SizeF) -> Result<(), SurfaceError> {
        self.ensure_live()?;
        CoordinateMapper::fit(size, self.state.parent_size())?;
        info!("Setting page {page} ({}x{})", size.width, size.height);
        self.apply_command(Command::SetPage { page, size }, None);
        Ok(())
    }

    /// Re-render the current page after overlay or annotation changes
    pub fn update(&mut self) -> Result<(), SurfaceError> {
        self.ensure_live()?;
        self.apply_command(Command::Update, None);
        Ok(())
    }

    /// Clear presentation and show a placeholder for `page`
    pub fn blank(&mut self, page: usize) -> Result<(), SurfaceError> {
        self.ensure_live()?;
        self.apply_command(Command::Blank(page), None);
        Ok(())
    }

    /// Cancel everything and free all buffers. Idempotent.
    pub fn release(&mut self) {
        if self.state.is_disposed() {
            return;
        }
        debug!("Releasing page surface for page {:?}", self.state.page());
        self.apply_command(Command::Release, None);
        self.scheduler.shutdown();
        // Nothing queued during teardown reaches the host
        self.queued.clear();
    }

    pub fn set_parent_size(&mut self, size: Size) -> Result<(), SurfaceError> {
        self.ensure_live()?;
        if let Some(page_size) = self.state.page_size() {
            CoordinateMapper::fit(page_size, size)?;
        }
        self.apply_command(Command::SetParentSize(size), None);
        Ok(())
    }

    /// The page view moved or resized; `view_area` is in parent pixels
    pub fn on_layout(&mut self, view_area: IRect) {
        if self.state.is_disposed() {
            return;
        }
        self.view_area = Some(view_area);
        let view_size = view_area.size();

        if self
            .tiles
            .pending()
            .is_some_and(|region| region.view_size != view_size)
        {
            trace!("Pending patch was cut for another view size, cancelling");
            self.cancel_patch_task();
        }
        if let Some(tile) = self.tiles.on_layout(view_size) {
            self.recycle_patch(tile.buffer);
            self.queued.push(SurfaceEvent::PatchDiscarded);
        }
    }

    /// Re-evaluate the high-resolution patch for the current view area
    pub fn update_hq(&mut self, forced: bool) -> Result<PatchDecision, SurfaceError> {
        self.ensure_live()?;
        let (Some(mapper), Some(view_area), Some(page)) =
            (self.mapper, self.view_area, self.state.page())
        else {
            return Ok(PatchDecision::Abort);
        };
        if !self.state.has_page() {
            return Ok(PatchDecision::Abort);
        }

        let decision = self.tiles.decide(
            view_area,
            mapper.display_size(),
            self.state.parent_size(),
            forced,
        );
        match decision {
            PatchDecision::Discard => self.remove_hq(),
            PatchDecision::Abort | PatchDecision::Unchanged => {}
            PatchDecision::Render { region, mode } => self.render_patch(page, region, mode),
        }
        Ok(decision)
    }

    /// Cancel the patch task and drop the tile
    pub fn remove_hq(&mut self) {
        self.cancel_patch_task();
        if let Some(buffer) = self.patch_target.take() {
            buffer.release();
        }
        if let Some(buffer) = self.spare_patch.take() {
            buffer.release();
        }
        if let Some(tile) = self.tiles.discard() {
            tile.buffer.release();
            self.queued.push(SurfaceEvent::PatchDiscarded);
        }
    }

    // ------------------------------------------------------------------
    // Owner-context continuation
    // ------------------------------------------------------------------

    /// Collect finished work: swap and composite finished renders, store
    /// text and links, and return what changed
    pub fn pump(&mut self, store: &dyn OverlayStore) -> Vec<SurfaceEvent> {
        if self.state.is_disposed() {
            self.queued.clear();
            return Vec::new();
        }
        for completion in self.scheduler.poll_completions() {
            self.handle_completion(store, completion);
        }
        while let Ok(result) = self.lookup_rx.try_recv() {
            self.handle_lookup(result);
        }
        std::mem::take(&mut self.queued)
    }

    /// Like [`PageSurface::pump`], but blocks up to `timeout` while work is
    /// outstanding and nothing has happened yet
    pub fn wait_and_pump(&mut self, store: &dyn OverlayStore, timeout: Duration) -> Vec<SurfaceEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.pump(store);
        while events.is_empty() && self.has_pending_work() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            if self.full_task.is_some() || self.patch_task.is_some() {
                if let Some(completion) = self.scheduler.wait_completion(slice) {
                    self.handle_completion(store, completion);
                }
            } else if let Ok(result) = self.lookup_rx.recv_timeout(slice) {
                self.handle_lookup(result);
            }
            events = self.pump(store);
        }
        events
    }

    /// Render tasks or lookups still outstanding
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.state.is_disposed()
            && (self.full_task.is_some() || self.patch_task.is_some() || self.lookups_in_flight > 0)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    #[must_use]
    pub fn page(&self) -> Option<usize> {
        self.state.page()
    }

    #[must_use]
    pub fn mapper(&self) -> Option<&CoordinateMapper> {
        self.mapper.as_ref()
    }

    /// Minimum-zoom display size of the current page
    #[must_use]
    pub fn display_size(&self) -> Option<Size> {
        self.mapper.map(|m| m.display_size())
    }

    /// Presented full-page buffer
    #[must_use]
    pub fn full_page(&self) -> Option<&SharedBuffer> {
        self.front.as_ref()
    }

    /// Presented patch tile
    #[must_use]
    pub fn patch(&self) -> Option<&PatchTile> {
        self.tiles.current()
    }

    #[must_use]
    pub fn buffer_stats(&self) -> BufferStats {
        self.buffers.stats()
    }

    /// View transform derived from the last layout
    #[must_use]
    pub fn view_transform(&self) -> ViewTransform {
        match (self.view_area, self.mapper) {
            (Some(area), Some(mapper)) => ViewTransform::from_view_area(area, mapper.display_size()),
            _ => ViewTransform::identity(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// True while loading and the busy delay has elapsed
    #[must_use]
    pub fn busy_indicator_visible(&self, now: Instant) -> bool {
        matches!(self.state.phase(), Phase::Blank | Phase::LoadingFull)
            && self.loading_since.is_some_and(|since| {
                now.saturating_duration_since(since) >= self.settings.busy_delay()
            })
    }

    // ------------------------------------------------------------------
    // Gestures
    // ------------------------------------------------------------------

    pub fn set_event_callback(&mut self, events: Option<Box<dyn PageEvents>>) {
        self.events = events;
    }

    /// Bitmap stamped on double tap when no event callback is installed
    pub fn set_signature(&mut self, bitmap: Option<SharedBuffer>) {
        self.signature = bitmap;
    }

    /// Shared with hosts that dispatch gestures from several threads
    #[must_use]
    pub fn gesture_guard(&self) -> Arc<GestureGuard> {
        Arc::clone(&self.gesture_guard)
    }

    /// Translate a parent-space point; `None` before a page is laid out
    #[must_use]
    pub fn translate_tap(&self, point: PointF, view: &ViewTransform) -> Option<TapLocation> {
        let mapper = self.mapper.as_ref()?;
        let page = self.state.page()?;
        Some(translate_tap(mapper, page, point, view))
    }

    pub fn on_single_tap(&self, point: PointF, view: &ViewTransform) -> GestureOutcome {
        self.report_tap(point, view, |events, location| events.single_tap(location))
    }

    pub fn on_long_press(&self, point: PointF, view: &ViewTransform) -> GestureOutcome {
        self.report_tap(point, view, |events, location| events.long_press(location))
    }

    fn report_tap(
        &self,
        point: PointF,
        view: &ViewTransform,
        report: impl FnOnce(&dyn PageEvents, &TapLocation),
    ) -> GestureOutcome {
        let (Some(events), Some(mapper)) = (self.events.as_deref(), self.mapper.as_ref()) else {
            return GestureOutcome::Ignored;
        };
        for err in outside_errors(&view_rect(mapper, view), point) {
            events.error(err);
        }
        match self.translate_tap(point, view) {
            Some(location) => {
                report(events, &location);
                GestureOutcome::Reported(location)
            }
            None => GestureOutcome::Ignored,
        }
    }

    /// Report the tap, or remove the overlay under it, or stamp a signature
    pub fn on_double_tap(
        &mut self,
        point: PointF,
        view: &ViewTransform,
        store: &mut dyn OverlayStore,
    ) -> GestureOutcome {
        let guard = Arc::clone(&self.gesture_guard);
        let Some(_ticket) = guard.try_acquire() else {
            debug!("Double tap while another gesture is in progress");
            return GestureOutcome::Busy;
        };
        if !self.state.has_page() {
            return GestureOutcome::Ignored;
        }
        let (Some(mapper), Some(page)) = (self.mapper, self.state.page()) else {
            return GestureOutcome::Ignored;
        };

        if let Some(&err) = outside_errors(&view_rect(&mapper, view), point).first() {
            if let Some(events) = self.events.as_deref() {
                events.error(err);
            }
            return GestureOutcome::Rejected(err);
        }

        let location = translate_tap(&mapper, page, point, view);
        if let Some(events) = self.events.as_deref() {
            events.double_tap(&location);
            return GestureOutcome::Reported(location);
        }

        if let Some(hit) = OverlayCompositor::hit_test(store, page, &mapper, location.display_point()) {
            if store.remove(hit.id) {
                info!("Removed overlay {:?} from page {page}", hit.id);
                // Old overlay pixels live in both buffers; redraw from scratch
                self.apply_command(Command::Redraw, None);
                return GestureOutcome::OverlayRemoved(hit.id);
            }
        }

        if let Some(bitmap) = self.signature.clone() {
            let overlay = Overlay::new(
                page,
                location.page_point(),
                self.settings.signature_width,
                self.settings.signature_height,
                OverlayKind::Signature,
                bitmap,
            );
            let id = store.add(overlay);
            info!(
                "Placed signature {id:?} on page {page} at ({:.1}, {:.1})",
                location.pdf_x, location.pdf_y
            );
            self.apply_command(Command::Update, None);
            return GestureOutcome::SignaturePlaced(id);
        }

        GestureOutcome::Ignored
    }

    // ------------------------------------------------------------------
    // Ink, selection and decorations
    // ------------------------------------------------------------------

    pub fn start_draw(&mut self, point: PointF, view: &ViewTransform) {
        if let Some(mapper) = self.mapper {
            self.ink.start(mapper.view_to_text(point, view));
        }
    }

    pub fn continue_draw(&mut self, point: PointF, view: &ViewTransform) {
        if let Some(mapper) = self.mapper {
            self.ink.extend(mapper.view_to_text(point, view));
        }
    }

    pub fn cancel_draw(&mut self) {
        self.ink.clear();
    }

    #[must_use]
    pub fn strokes(&self) -> &[DrawingStroke] {
        self.ink.strokes()
    }

    /// Search hits in text space
    pub fn set_search_boxes(&mut self, boxes: Vec<RectF>) {
        self.search_boxes = boxes;
    }

    pub fn set_link_highlighting(&mut self, highlight: bool) {
        self.highlight_links = highlight;
    }

    pub fn set_item_select_box(&mut self, rect: Option<RectF>) {
        self.item_select_box = rect;
    }

    /// Select text between two parent-space drag points. Text is extracted
    /// on first use; the highlight appears once it arrives.
    pub fn select_text(&mut self, from: PointF, to: PointF, view: &ViewTransform) {
        let Some(mapper) = self.mapper else {
            return;
        };
        self.selection = Some(SelectionBox::from_points(
            mapper.view_to_text(from, view),
            mapper.view_to_text(to, view),
        ));
        if self.text.is_none() && !self.text_requested {
            self.text_requested = true;
            self.spawn_lookup(LookupKind::Text);
        }
    }

    pub fn deselect_text(&mut self) {
        self.selection = None;
    }

    /// `None` until both a selection and the page text exist
    #[must_use]
    pub fn selected_text(&self) -> Option<String> {
        let selection = self.selection.as_ref()?;
        let text = self.text.as_deref()?;
        Some(TextSelectionEngine::new(text).selected_text(selection))
    }

    /// Cached link under a parent-space point
    #[must_use]
    pub fn link_at(&self, point: PointF, view: &ViewTransform) -> Option<&LinkRegion> {
        let mapper = self.mapper.as_ref()?;
        let text_point = mapper.view_to_text(point, view);
        self.links
            .as_deref()?
            .iter()
            .find(|link| link.contains(text_point))
    }

    #[must_use]
    pub fn decorations(&self, view: &ViewTransform) -> Decorations {
        let Some(mapper) = self.mapper.as_ref() else {
            return Decorations::default();
        };
        // A blank page has no mapper, so everything below belongs to a laid-out page
        let scale = mapper.source_scale() * view.zoom;

        let search_boxes = self.search_boxes.iter().map(|r| r.scaled(scale)).collect();
        let links = match (&self.links, self.highlight_links) {
            (Some(links), true) => links.iter().map(|l| l.rect.scaled(scale)).collect(),
            _ => Vec::new(),
        };
        let selection = match (&self.selection, &self.text) {
            (Some(selection), Some(text)) => TextSelectionEngine::new(text)
                .highlight_rects(selection)
                .iter()
                .map(|r| r.scaled(scale))
                .collect(),
            _ => Vec::new(),
        };

        let ink_bounds = self
            .ink
            .strokes()
            .iter()
            .fold(None, |acc: Option<RectF>, stroke| {
                let mut rect = acc.unwrap_or_default();
                rect.union(&stroke.bounds().scaled(scale));
                Some(rect)
            });

        Decorations {
            search_boxes,
            links,
            selection,
            item_select_box: self.item_select_box.map(|r| r.scaled(scale)),
            strokes: self.ink.strokes().iter().map(|s| s.scaled(scale)).collect(),
            ink_bounds,
            ink_thickness: INK_THICKNESS * scale,
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn ensure_live(&self) -> Result<(), SurfaceError> {
        if self.state.is_disposed() {
            Err(SurfaceError::Disposed)
        } else {
            Ok(())
        }
    }

    fn apply_command(&mut self, cmd: Command, store: Option<&dyn OverlayStore>) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects, store);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>, store: Option<&dyn OverlayStore>) {
        for effect in effects {
            match effect {
                Effect::CancelFull => {
                    self.scheduler.cancel_tier(Tier::FullPage);
                    self.full_task = None;
                }

                Effect::DiscardPatch => self.remove_hq(),

                Effect::ResetPageData => {
                    self.text = None;
                    self.text_requested = false;
                    self.links = None;
                    self.selection = None;
                    self.ink.clear();
                    self.search_boxes.clear();
                    self.item_select_box = None;
                }

                Effect::Relayout => {
                    self.mapper = self.state.page_size().and_then(|size| {
                        CoordinateMapper::fit(size, self.state.parent_size())
                            .inspect_err(|e| warn!("Cannot lay out page: {e}"))
                            .ok()
                    });
                    if let Some(mapper) = &self.mapper {
                        debug!(
                            "Display scale {:.4}, size {:?}",
                            mapper.source_scale(),
                            mapper.display_size()
                        );
                    }
                }

                Effect::ClearPresentation => {
                    if let Some(front) = self.front.take() {
                        front.release();
                    }
                    self.loading_since = Some(Instant::now());
                }

                Effect::RenderFull { incremental } => self.render_full(incremental),

                Effect::ExtractLinks => self.spawn_lookup(LookupKind::Links),

                Effect::PresentFull => self.present_full(store),

                Effect::RefreshPatch => {
                    if let Err(e) = self.update_hq(true) {
                        debug!("Patch refresh skipped: {e}");
                    }
                }

                Effect::ReleaseBuffers => {
                    for buffer in [self.front.take(), self.back.take()].into_iter().flatten() {
                        buffer.release();
                    }
                    self.loading_since = None;
                }
            }
        }
    }

    fn render_full(&mut self, incremental: bool) {
        let (Some(mapper), Some(page)) = (self.mapper, self.state.page()) else {
            return;
        };
        // The back buffer is reused below; the old task must be gone first
        self.scheduler.cancel_tier(Tier::FullPage);
        self.full_task = None;

        let view_size = mapper.display_size();
        let target = match self.buffers.reuse_or_allocate(self.back.take(), view_size) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("Full-page render of page {page} abandoned: {err}");
                self.queued.push(SurfaceEvent::RenderFailed {
                    tier: Tier::FullPage,
                    fault: err.into(),
                });
                let _ = self.state.apply(Command::FullFailed);
                return;
            }
        };
        if incremental {
            copy_pixels(self.front.as_ref(), &target);
        }

        let renderer = Arc::clone(&self.renderer);
        let job_target = target.clone();
        let handle = self.scheduler.submit(Tier::FullPage, move |token| {
            if incremental {
                renderer.update_page(page, &job_target, view_size, token)
            } else {
                renderer.render_full_page(page, &job_target, view_size, token)
            }
        });
        debug!(
            "Full-page {} of page {page} at {view_size:?} as {:?}",
            if incremental { "update" } else { "render" },
            handle.id()
        );
        self.back = Some(target);
        self.full_task = Some(handle.id());
    }

    fn present_full(&mut self, store: Option<&dyn OverlayStore>) {
        let Some(back) = self.back.take() else {
            return;
        };
        if let (Some(store), Some(mapper), Some(page)) = (store, self.mapper, self.state.page()) {
            self.compositor.composite(store, page, &mapper, &back, None);
        }
        if let Some(previous) = self.front.replace(back) {
            self.back = Some(previous);
        }
        self.loading_since = None;
        if let Some(page) = self.state.page() {
            self.queued.push(SurfaceEvent::FullPagePresented { page });
        }
    }

    fn render_patch(&mut self, page: usize, region: RenderRegion, mode: PatchMode) {
        self.cancel_patch_task();

        let reusable = match (self.patch_target.take(), self.spare_patch.take()) {
            (Some(target), Some(spare)) if spare.size() == region.area.size() => {
                target.release();
                Some(spare)
            }
            (Some(target), Some(spare)) => {
                spare.release();
                Some(target)
            }
            (target, spare) => target.or(spare),
        };
        let target = match self.buffers.reuse_or_allocate(reusable, region.area.size()) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("Patch render abandoned: {err}");
                self.queued.push(SurfaceEvent::RenderFailed {
                    tier: Tier::Patch,
                    fault: err.into(),
                });
                return;
            }
        };
        if mode == PatchMode::Update {
            copy_pixels(self.tiles.current().map(|tile| &tile.buffer), &target);
        }

        let renderer = Arc::clone(&self.renderer);
        let job_target = target.clone();
        let handle = self.scheduler.submit(Tier::Patch, move |token| match mode {
            PatchMode::Redraw => renderer.render_patch(page, &job_target, &region, token),
            PatchMode::Update => renderer.update_patch(page, &job_target, &region, token),
        });
        debug!(
            "Patch {mode:?} of page {page} area {:?} in view {:?} as {:?}",
            region.area,
            region.view_size,
            handle.id()
        );
        self.tiles.begin(region);
        self.patch_target = Some(target);
        self.patch_task = Some(handle.id());
    }

    fn cancel_patch_task(&mut self) {
        self.scheduler.cancel_tier(Tier::Patch);
        self.patch_task = None;
        self.tiles.abandon_pending();
    }

    fn recycle_patch(&mut self, buffer: SharedBuffer) {
        if let Some(previous) = self.spare_patch.replace(buffer) {
            previous.release();
        }
    }

    fn handle_completion(&mut self, store: &dyn OverlayStore, completion: TaskCompletion) {
        let TaskCompletion { id, tier, status } = completion;
        match tier {
            Tier::FullPage => {
                if self.full_task != Some(id) {
                    trace!("Ignoring stale full-page completion {id:?}");
                    return;
                }
                self.full_task = None;
                match status {
                    TaskStatus::Completed => self.apply_command(Command::FullRendered, Some(store)),
                    TaskStatus::Cancelled => debug!("Full-page task {id:?} cancelled"),
                    TaskStatus::Failed(fault) => {
                        warn!("Full-page render failed, keeping last presentation: {fault}");
                        self.queued.push(SurfaceEvent::RenderFailed { tier, fault });
                        self.apply_command(Command::FullFailed, Some(store));
                    }
                }
            }

            Tier::Patch => {
                if self.patch_task != Some(id) {
                    trace!("Ignoring stale patch completion {id:?}");
                    return;
                }
                self.patch_task = None;
                match status {
                    TaskStatus::Completed => self.present_patch(store),
                    TaskStatus::Cancelled => {
                        debug!("Patch task {id:?} cancelled");
                        self.tiles.abandon_pending();
                    }
                    TaskStatus::Failed(fault) => {
                        warn!("Patch render failed: {fault}");
                        self.tiles.abandon_pending();
                        self.queued.push(SurfaceEvent::RenderFailed { tier, fault });
                    }
                }
            }
        }
    }

    fn present_patch(&mut self, store: &dyn OverlayStore) {
        let (Some(target), Some(region), Some(mapper), Some(page)) = (
            self.patch_target.take(),
            self.tiles.pending(),
            self.mapper,
            self.state.page(),
        ) else {
            self.tiles.abandon_pending();
            return;
        };

        self.compositor
            .composite(store, page, &mapper, &target, Some(&region));
        if let Some(replaced) = self.tiles.complete(target) {
            self.recycle_patch(replaced.buffer);
        }
        self.queued.push(SurfaceEvent::PatchPresented {
            page,
            area: region.area,
        });
    }

    fn spawn_lookup(&mut self, kind: LookupKind) {
        let Some(page) = self.state.page() else {
            return;
        };
        let generation = self.state.generation();
        let renderer = Arc::clone(&self.renderer);
        let tx = self.lookup_tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("{}-lookup", kind.name()))
            .spawn(move || {
                let extracted = catch_unwind(AssertUnwindSafe(|| match kind {
                    LookupKind::Text => Lookup::Text(renderer.extract_text(page)),
                    LookupKind::Links => Lookup::Links(renderer.extract_links(page)),
                }));
                let lookup = extracted.unwrap_or_else(|_| {
                    error!("{} extraction for page {page} panicked", kind.name());
                    match kind {
                        LookupKind::Text => Lookup::Text(Vec::new()),
                        LookupKind::Links => Lookup::Links(Vec::new()),
                    }
                });
                let _ = tx.send(LookupResult {
                    generation,
                    page,
                    lookup,
                });
            });

        match spawned {
            Ok(_) => self.lookups_in_flight += 1,
            Err(e) => error!("Failed to spawn {} lookup: {e}", kind.name()),
        }
    }

    fn handle_lookup(&mut self, result: LookupResult) {
        self.lookups_in_flight = self.lookups_in_flight.saturating_sub(1);
        if result.generation != self.state.generation() {
            trace!("Dropping lookup for stale page {}", result.page);
            return;
        }
        match result.lookup {
            Lookup::Text(lines) => {
                debug!("Page {} text: {} lines", result.page, lines.len());
                self.text = Some(lines);
                self.queued.push(SurfaceEvent::TextReady { page: result.page });
            }
            Lookup::Links(links) => {
                let count = links.len();
                self.links = Some(links);
                self.queued.push(SurfaceEvent::LinksReady {
                    page: result.page,
                    count,
                });
            }
        }
    }
}

impl Drop for PageSurface {
    fn drop(&mut self) {
        self.release();
    }
}

/// Seed `target` with the pixels of `source` when their sizes match
fn copy_pixels(source: Option<&SharedBuffer>, target: &SharedBuffer) {
    let Some(source) = source.filter(|s| s.size() == target.size()) else {
        return;
    };
    if let Some(pixels) = source.snapshot() {
        target.write(|image| *image = pixels);
    }
}
