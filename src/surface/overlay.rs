//! Positioned overlay bitmaps and their compositing onto rendered buffers
//!
//! Overlays live in a host-owned [`OverlayStore`]. The compositor only
//! borrows the store for the duration of a draw pass.

use std::collections::BTreeMap;

use image::imageops::{self, FilterType};
use log::{debug, warn};

use super::buffer::SharedBuffer;
use super::coords::CoordinateMapper;
use super::geometry::{PointF, RectF};
use super::request::RenderRegion;

/// Identifier assigned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    Signature,
    UserImage,
    Generic,
}

/// A bitmap placed on a page.
///
/// `position` is the overlay centre in page units (origin bottom-left);
/// `width`/`height` are page units as well.
#[derive(Clone, Debug)]
pub struct Overlay {
    pub id: OverlayId,
    pub page: usize,
    pub position: PointF,
    pub width: f32,
    pub height: f32,
    pub kind: OverlayKind,
    pub removable: bool,
    pub metadata: BTreeMap<String, String>,
    pub bitmap: SharedBuffer,
}

impl Overlay {
    /// Overlay with a placeholder id; stores assign the real one on insert
    #[must_use]
    pub fn new(
        page: usize,
        position: PointF,
        width: f32,
        height: f32,
        kind: OverlayKind,
        bitmap: SharedBuffer,
    ) -> Self {
        Self {
            id: OverlayId(0),
            page,
            position,
            width,
            height,
            kind,
            removable: true,
            metadata: BTreeMap::new(),
            bitmap,
        }
    }

    #[must_use]
    pub fn removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Bounding box in minimum-zoom display pixels
    #[must_use]
    pub fn display_bounds(&self, mapper: &CoordinateMapper) -> RectF {
        let (w, h) = mapper.scaled_size(self.width, self.height);
        RectF::centered(mapper.page_to_screen(self.position), w, h)
    }
}

/// Ordered overlay collection owned by the host
pub trait OverlayStore {
    /// Overlays in draw order; later entries draw on top
    fn list(&self) -> Vec<Overlay>;

    /// Insert and return the assigned id
    fn add(&mut self, overlay: Overlay) -> OverlayId;

    /// Returns false when `id` is unknown
    fn remove(&mut self, id: OverlayId) -> bool;
}

/// In-memory [`OverlayStore`]
#[derive(Debug, Default)]
pub struct VecOverlayStore {
    overlays: Vec<Overlay>,
    next_id: u64,
}

impl VecOverlayStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    #[must_use]
    pub fn count_of(&self, kind: OverlayKind) -> usize {
        self.overlays.iter().filter(|o| o.kind == kind).count()
    }

    #[must_use]
    pub fn get(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.id == id)
    }
}

impl OverlayStore for VecOverlayStore {
    fn list(&self) -> Vec<Overlay> {
        self.overlays.clone()
    }

    fn add(&mut self, mut overlay: Overlay) -> OverlayId {
        self.next_id += 1;
        overlay.id = OverlayId(self.next_id);
        let id = overlay.id;
        self.overlays.push(overlay);
        id
    }

    fn remove(&mut self, id: OverlayId) -> bool {
        let before = self.overlays.len();
        self.overlays.retain(|o| o.id != id);
        self.overlays.len() != before
    }
}

/// Counts from one compositing pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositeReport {
    pub drawn: usize,
    pub culled: usize,
    pub released: usize,
}

/// Draws the current page's overlays onto full-page or patch buffers
#[derive(Clone, Copy, Debug)]
pub struct OverlayCompositor {
    filter: FilterType,
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl OverlayCompositor {
    #[must_use]
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }

    /// Composite every overlay of `page` onto `target`.
    ///
    /// With `patch` set, `target` holds `patch.area` of a view laid out at
    /// `patch.view_size`; overlays outside that area are culled.
    pub fn composite(
        &self,
        store: &dyn OverlayStore,
        page: usize,
        mapper: &CoordinateMapper,
        target: &SharedBuffer,
        patch: Option<&RenderRegion>,
    ) -> CompositeReport {
        let mut report = CompositeReport::default();
        let display = mapper.display_size();
        let zoom = patch.map_or(1.0, |region| {
            region.view_size.height as f32 / display.height as f32
        });

        for overlay in store.list().iter().filter(|o| o.page == page) {
            let (scaled_w, scaled_h) = mapper.scaled_size(overlay.width, overlay.height);
            let width = scaled_w * zoom;
            let height = scaled_h * zoom;

            let screen = mapper.page_to_screen(overlay.position);
            let global = PointF::new(screen.x * zoom, screen.y * zoom);
            let global_bounds = RectF::centered(global, width, height);

            let local = match patch {
                Some(region) => {
                    if !global_bounds.intersects_irect(&region.area) {
                        report.culled += 1;
                        continue;
                    }
                    PointF::new(
                        global.x - region.area.left as f32,
                        global.y - region.area.top as f32,
                    )
                }
                None => global,
            };

            let dest_w = width.round() as u32;
            let dest_h = height.round() as u32;
            if dest_w == 0 || dest_h == 0 {
                report.culled += 1;
                continue;
            }

            let filter = self.filter;
            let Some(scaled) = overlay
                .bitmap
                .read(|src| imageops::resize(src, dest_w, dest_h, filter))
            else {
                warn!("Overlay {:?} bitmap was released, skipping", overlay.id);
                report.released += 1;
                continue;
            };

            let left = (local.x - width / 2.0).round() as i64;
            let top = (local.y - height / 2.0).round() as i64;
            if target
                .write(|image| imageops::overlay(image, &scaled, left, top))
                .is_some()
            {
                report.drawn += 1;
            }
        }

        debug!(
            "Composited page {page} overlays: drawn={} culled={} released={}",
            report.drawn, report.culled, report.released
        );
        report
    }

    /// First removable overlay of `page` under a display-space point
    #[must_use]
    pub fn hit_test(
        store: &dyn OverlayStore,
        page: usize,
        mapper: &CoordinateMapper,
        display_point: PointF,
    ) -> Option<Overlay> {
        store.list().into_iter().find(|overlay| {
            overlay.page == page
                && overlay.removable
                && overlay.display_bounds(mapper).contains(display_point)
        })
    }
}
