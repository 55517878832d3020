//! Render task identifiers, outcomes and error types

use super::geometry::{IRect, Size};

/// Unique identifier for render tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The two independently scheduled render classes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Whole page at minimum zoom
    FullPage,
    /// Visible viewport region at the current zoom
    Patch,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::FullPage, Tier::Patch];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Tier::FullPage => 0,
            Tier::Patch => 1,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Tier::FullPage => "full-page",
            Tier::Patch => "patch",
        }
    }
}

/// What the rasterizer is asked to draw into its target buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderRegion {
    /// Size of the whole page view the region is cut from
    pub view_size: Size,
    /// Rectangle inside that view, relative to its top-left corner
    pub area: IRect,
}

impl RenderRegion {
    /// Region covering the entire view
    #[must_use]
    pub fn whole(view_size: Size) -> Self {
        Self {
            view_size,
            area: IRect::from_size(view_size),
        }
    }
}

/// Errors raised by render jobs. Never propagated as a panic.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RenderFault {
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("render target was released")]
    BufferReleased,

    #[error("renderer panicked: {detail}")]
    Panicked { detail: String },

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Errors surfaced by the page surface API
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SurfaceError {
    #[error("cannot allocate {width}x{height} pixel buffer")]
    Allocation { width: u32, height: u32 },

    #[error("pixel buffer would be empty")]
    EmptyBuffer,

    #[error("invalid page size {width}x{height}")]
    InvalidPageSize { width: f32, height: f32 },

    #[error("surface has been released")]
    Disposed,
}

impl From<SurfaceError> for RenderFault {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::Allocation { width, height } => RenderFault::OutOfMemory {
                bytes: Size::new(width, height).rgba_bytes().unwrap_or(usize::MAX),
            },
            other => RenderFault::generic(other.to_string()),
        }
    }
}

/// Final state of a render task
#[derive(Clone, Debug, PartialEq)]
pub enum TaskStatus {
    Completed,
    Cancelled,
    Failed(RenderFault),
}

/// Completion notice sent from a lane back to the owner context
#[derive(Clone, Debug)]
pub struct TaskCompletion {
    pub id: TaskId,
    pub tier: Tier,
    pub status: TaskStatus,
}
