//! Text selection over extracted word boxes
//!
//! Works in y-down text space. A selection box is built from the two drag
//! points and ordered on y, so the point that is higher on the page always
//! supplies the start column.

use super::geometry::{PointF, RectF};
use super::renderer::{TextLine, TextWord};

/// Selection rectangle with `top <= bottom`.
///
/// `left`/`right` keep the x of the upper/lower drag point and may be
/// reversed, which matters for the first and last selected line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionBox(pub RectF);

impl SelectionBox {
    /// Order two drag points on y while keeping each point's x with its y
    #[must_use]
    pub fn from_points(a: PointF, b: PointF) -> Self {
        if a.y <= b.y {
            Self(RectF::new(a.x, a.y, b.x, b.y))
        } else {
            Self(RectF::new(b.x, b.y, a.x, a.y))
        }
    }

    #[must_use]
    pub fn rect(&self) -> RectF {
        self.0
    }
}

/// Horizontal window words must overlap to be selected
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineClip {
    pub start: f32,
    pub end: f32,
}

impl LineClip {
    pub const UNCLIPPED: LineClip = LineClip {
        start: f32::NEG_INFINITY,
        end: f32::INFINITY,
    };

    #[must_use]
    pub fn admits(&self, word: &TextWord) -> bool {
        word.rect.right > self.start && word.rect.left < self.end
    }
}

/// One line touched by the selection
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedLine<'a> {
    pub line_index: usize,
    pub clip: LineClip,
    pub words: Vec<&'a TextWord>,
}

impl SelectedLine<'_> {
    /// Union of the selected words, empty when none were selected
    #[must_use]
    pub fn bounds(&self) -> RectF {
        let mut rect = RectF::default();
        for word in &self.words {
            rect.union(&word.rect);
        }
        rect
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Maps a selection box onto the lines and words of one page
#[derive(Clone, Copy, Debug)]
pub struct TextSelectionEngine<'a> {
    lines: &'a [TextLine],
}

impl<'a> TextSelectionEngine<'a> {
    #[must_use]
    pub fn new(lines: &'a [TextLine]) -> Self {
        Self { lines }
    }

    /// Lines intersecting the box, each with its clip window and words
    #[must_use]
    pub fn select(&self, selection: &SelectionBox) -> Vec<SelectedLine<'a>> {
        let rect = selection.rect();
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(line_index, line)| {
                let top = line.top()?;
                let bottom = line.bottom()?;
                if !(bottom > rect.top && top < rect.bottom) {
                    return None;
                }

                let first_line = top < rect.top;
                let last_line = bottom > rect.bottom;
                let clip = match (first_line, last_line) {
                    (true, true) => LineClip {
                        start: rect.left.min(rect.right),
                        end: rect.left.max(rect.right),
                    },
                    (true, false) => LineClip {
                        start: rect.left,
                        end: f32::INFINITY,
                    },
                    (false, true) => LineClip {
                        start: f32::NEG_INFINITY,
                        end: rect.right,
                    },
                    (false, false) => LineClip::UNCLIPPED,
                };

                let words = line.words.iter().filter(|w| clip.admits(w)).collect();
                Some(SelectedLine {
                    line_index,
                    clip,
                    words,
                })
            })
            .collect()
    }

    /// Highlight rectangles, one per line with at least one selected word
    #[must_use]
    pub fn highlight_rects(&self, selection: &SelectionBox) -> Vec<RectF> {
        self.select(selection)
            .iter()
            .map(SelectedLine::bounds)
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Selected words joined by spaces, lines joined by newlines
    #[must_use]
    pub fn selected_text(&self, selection: &SelectionBox) -> String {
        self.select(selection)
            .iter()
            .filter(|line| !line.words.is_empty())
            .map(SelectedLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
