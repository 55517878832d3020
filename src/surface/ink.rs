//! Freehand ink strokes in y-down text space

use super::geometry::{PointF, RectF};

/// Stroke width in text-space units
pub const INK_THICKNESS: f32 = 10.0;

/// One continuous stroke, in input order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawingStroke {
    pub points: Vec<PointF>,
}

impl DrawingStroke {
    /// A single-point stroke renders as a dot
    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.points.len() < 2
    }

    /// Bounds including half the ink thickness on each side
    #[must_use]
    pub fn bounds(&self) -> RectF {
        let mut rect = RectF::default();
        let half = INK_THICKNESS / 2.0;
        for p in &self.points {
            rect.union(&RectF::new(p.x - half, p.y - half, p.x + half, p.y + half));
        }
        rect
    }

    /// Points scaled by `factor`, as drawn in view space
    #[must_use]
    pub fn scaled(&self, factor: f32) -> Vec<PointF> {
        self.points
            .iter()
            .map(|p| PointF::new(p.x * factor, p.y * factor))
            .collect()
    }
}

/// Strokes accumulated for the current page
#[derive(Clone, Debug, Default)]
pub struct Ink {
    strokes: Vec<DrawingStroke>,
}

impl Ink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, point: PointF) {
        self.strokes.push(DrawingStroke {
            points: vec![point],
        });
    }

    /// Extend the last stroke; ignored before any `start`
    pub fn extend(&mut self, point: PointF) {
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.points.push(point);
        }
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    #[must_use]
    pub fn strokes(&self) -> &[DrawingStroke] {
        &self.strokes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}
