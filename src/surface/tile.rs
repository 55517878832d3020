//! High-resolution patch decisions
//!
//! The patch covers the part of the zoomed page view that is visible inside
//! the parent viewport. [`TileCoordinator`] decides per viewport change
//! whether that patch must be dropped, redrawn, incrementally updated or left
//! alone; the page surface owns the buffers and the render tasks.

use log::{debug, trace};

use super::buffer::SharedBuffer;
use super::geometry::{IRect, Size};
use super::request::RenderRegion;

/// A rendered patch and the layout it was rendered for
#[derive(Clone, Debug)]
pub struct PatchTile {
    pub buffer: SharedBuffer,
    /// Page view size the patch was cut from
    pub view_size: Size,
    /// Patch rectangle relative to the page view's top-left
    pub area: IRect,
}

impl PatchTile {
    #[must_use]
    pub fn region(&self) -> RenderRegion {
        RenderRegion {
            view_size: self.view_size,
            area: self.area,
        }
    }

    /// Valid only for the view size it was rendered at
    #[must_use]
    pub fn is_valid_for(&self, view_size: Size) -> bool {
        self.view_size == view_size
    }
}

/// How a patch render treats the existing tile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchMode {
    /// Rasterize the whole patch from scratch
    Redraw,
    /// Same area as before; let the renderer refresh what changed
    Update,
}

/// Outcome of a viewport change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchDecision {
    /// View is at minimum zoom; no patch is needed and any tile goes away
    Discard,
    /// Page view does not intersect the viewport this cycle
    Abort,
    /// Nothing changed and no update was requested
    Unchanged,
    /// Submit a patch render
    Render { region: RenderRegion, mode: PatchMode },
}

/// Tracks the presented tile and the patch currently being rendered
#[derive(Debug, Default)]
pub struct TileCoordinator {
    current: Option<PatchTile>,
    pending: Option<RenderRegion>,
}

impl TileCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do for the page view at `view_area` (parent coordinates)
    #[must_use]
    pub fn decide(
        &self,
        view_area: IRect,
        display_size: Size,
        parent_size: Size,
        forced: bool,
    ) -> PatchDecision {
        let view_size = view_area.size();
        if view_size == display_size {
            trace!("View at minimum zoom, patch not needed");
            return PatchDecision::Discard;
        }

        let Some(visible) = IRect::from_size(parent_size).intersect(&view_area) else {
            debug!("Page view {view_area:?} outside viewport {parent_size:?}");
            return PatchDecision::Abort;
        };
        let region = RenderRegion {
            view_size,
            area: visible.offset(-view_area.left, -view_area.top),
        };

        let unchanged = self.latest_region() == Some(region);
        match (unchanged, forced) {
            (true, false) => PatchDecision::Unchanged,
            (true, true) => PatchDecision::Render {
                region,
                mode: PatchMode::Update,
            },
            (false, _) => PatchDecision::Render {
                region,
                mode: PatchMode::Redraw,
            },
        }
    }

    /// Region most recently requested or presented
    fn latest_region(&self) -> Option<RenderRegion> {
        self.pending
            .or_else(|| self.current.as_ref().map(PatchTile::region))
    }

    /// Record a submitted patch render
    pub fn begin(&mut self, region: RenderRegion) {
        self.pending = Some(region);
    }

    #[must_use]
    pub fn pending(&self) -> Option<RenderRegion> {
        self.pending
    }

    /// Forget the in-flight request after it was cancelled or failed
    pub fn abandon_pending(&mut self) {
        self.pending = None;
    }

    /// Promote a finished render; returns the tile it replaces
    pub fn complete(&mut self, buffer: SharedBuffer) -> Option<PatchTile> {
        let region = self.pending.take()?;
        let previous = self.current.replace(PatchTile {
            buffer,
            view_size: region.view_size,
            area: region.area,
        });
        previous.filter(|old| {
            self.current
                .as_ref()
                .is_none_or(|new| !new.buffer.same_as(&old.buffer))
        })
    }

    #[must_use]
    pub fn current(&self) -> Option<&PatchTile> {
        self.current.as_ref()
    }

    /// Drop the tile and any pending request; the caller releases the buffer
    pub fn discard(&mut self) -> Option<PatchTile> {
        self.pending = None;
        self.current.take()
    }

    /// Layout changed; discard a tile rendered for another view size
    pub fn on_layout(&mut self, view_size: Size) -> Option<PatchTile> {
        if self
            .current
            .as_ref()
            .is_some_and(|tile| !tile.is_valid_for(view_size))
        {
            debug!("View resized to {view_size:?}, discarding patch tile");
            return self.current.take();
        }
        None
    }
}
