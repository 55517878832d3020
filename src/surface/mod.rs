//! Dual-resolution page rendering infrastructure

mod buffer;
mod coords;
mod geometry;
mod gesture;
mod ink;
mod overlay;
mod page;
mod renderer;
mod request;
mod scheduler;
mod selection;
mod state;
mod tile;
mod worker;

pub use buffer::{BufferId, BufferLifecycle, BufferStats, SharedBuffer};
pub use coords::{CoordinateMapper, ViewTransform, fit_scale, scaled_page_size};
pub use geometry::{IRect, PointF, RectF, Size, SizeF};
pub use gesture::{
    GestureError, GestureGuard, GestureOutcome, GestureTicket, PageEvents, TapLocation,
    outside_errors, translate_tap, view_rect,
};
pub use ink::{DrawingStroke, INK_THICKNESS, Ink};
pub use overlay::{
    CompositeReport, Overlay, OverlayCompositor, OverlayId, OverlayKind, OverlayStore,
    VecOverlayStore,
};
pub use page::{Decorations, PageSurface, SurfaceEvent};
pub use renderer::{LinkRegion, LinkTarget, PageRenderer, TextLine, TextWord};
pub use request::{
    RenderFault, RenderRegion, SurfaceError, TaskCompletion, TaskId, TaskStatus, Tier,
};
pub use scheduler::{RenderScheduler, TaskHandle};
pub use selection::{LineClip, SelectedLine, SelectionBox, TextSelectionEngine};
pub use state::{Command, Effect, Phase, SurfaceState};
pub use tile::{PatchDecision, PatchMode, PatchTile, TileCoordinator};
pub use worker::{Cancelled, CancellationToken, JobFn};
