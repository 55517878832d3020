//! Rasterizer capability injected into a page surface

use super::buffer::SharedBuffer;
use super::geometry::{PointF, RectF, Size};
use super::request::{RenderFault, RenderRegion};
use super::worker::CancellationToken;

/// A word box in y-down text space
#[derive(Clone, Debug, PartialEq)]
pub struct TextWord {
    pub rect: RectF,
    pub text: String,
}

impl TextWord {
    pub fn new(rect: RectF, text: impl Into<String>) -> Self {
        Self {
            rect,
            text: text.into(),
        }
    }
}

/// Words sharing one vertical extent
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextLine {
    pub words: Vec<TextWord>,
}

impl TextLine {
    #[must_use]
    pub fn new(words: Vec<TextWord>) -> Self {
        Self { words }
    }

    /// Top of the line, taken from its first word
    #[must_use]
    pub fn top(&self) -> Option<f32> {
        self.words.first().map(|w| w.rect.top)
    }

    /// Bottom of the line, taken from its first word
    #[must_use]
    pub fn bottom(&self) -> Option<f32> {
        self.words.first().map(|w| w.rect.bottom)
    }
}

/// Link target type
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkTarget {
    Internal { page: usize },
    External { uri: String },
}

/// Clickable area in y-down text space
#[derive(Clone, Debug, PartialEq)]
pub struct LinkRegion {
    pub rect: RectF,
    pub target: LinkTarget,
}

impl LinkRegion {
    #[must_use]
    pub fn contains(&self, point: PointF) -> bool {
        self.rect.contains(point)
    }
}

/// External rasterizer and text extractor for one document.
///
/// Render entry points run on a worker lane. They must poll `token` and
/// return promptly once it is cancelled; the scheduler guarantees that the
/// owner never reuses `target` before the call returns.
pub trait PageRenderer: Send + Sync {
    /// Rasterize `region.area` of a page laid out at `region.view_size`
    fn render_patch(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
    ) -> Result<(), RenderFault>;

    /// Rasterize the whole page at `view_size`
    fn render_full_page(
        &self,
        page: usize,
        target: &SharedBuffer,
        view_size: Size,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.render_patch(page, target, &RenderRegion::whole(view_size), token)
    }

    /// Incremental counterpart of [`PageRenderer::render_full_page`].
    /// `target` holds the previously presented pixels.
    fn update_page(
        &self,
        page: usize,
        target: &SharedBuffer,
        view_size: Size,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.render_full_page(page, target, view_size, token)
    }

    /// Re-rasterize after annotation changes. Renderers that keep display
    /// lists can redraw only what changed; the default redraws everything.
    fn update_patch(
        &self,
        page: usize,
        target: &SharedBuffer,
        region: &RenderRegion,
        token: &CancellationToken,
    ) -> Result<(), RenderFault> {
        self.render_patch(page, target, region, token)
    }

    fn extract_links(&self, _page: usize) -> Vec<LinkRegion> {
        Vec::new()
    }

    fn extract_text(&self, _page: usize) -> Vec<TextLine> {
        Vec::new()
    }
}
