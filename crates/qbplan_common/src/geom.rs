//! Axis-aligned integer rectangles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned rectangle in integer layout units.
///
/// Always normalized so that `left <= right` and `bottom <= top`. Two
/// rectangles that only share an edge do not overlap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Minimum x coordinate.
    pub left: i64,
    /// Minimum y coordinate.
    pub bottom: i64,
    /// Maximum x coordinate.
    pub right: i64,
    /// Maximum y coordinate.
    pub top: i64,
}

impl Rect {
    /// Creates a rectangle from two opposite corners in any order.
    pub fn from_corners(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self {
            left: x1.min(x2),
            bottom: y1.min(y2),
            right: x1.max(x2),
            top: y1.max(y2),
        }
    }

    /// Creates a rectangle from its lower-left origin and size.
    pub fn with_size(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self::from_corners(x, y, x + width, y + height)
    }

    /// Horizontal extent.
    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    /// Vertical extent.
    pub fn height(&self) -> i64 {
        self.top - self.bottom
    }

    /// Area as `f64`, which cannot overflow for any representable rectangle.
    pub fn area(&self) -> f64 {
        self.width() as f64 * self.height() as f64
    }

    /// Center point.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left as f64 + self.right as f64) / 2.0,
            (self.bottom as f64 + self.top as f64) / 2.0,
        )
    }

    /// Returns `true` if `other` lies entirely inside `self` (edges may coincide).
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.bottom >= self.bottom
            && other.top <= self.top
    }

    /// Returns `true` if the interiors of the two rectangles intersect.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.bottom < other.top
            && other.bottom < self.top
    }

    /// Returns `true` if the closed rectangles share any point, edges included.
    pub fn touches(&self, other: &Rect) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.bottom <= other.top
            && other.bottom <= self.top
    }

    /// The overlapping region, if the interiors intersect.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Rect {
            left: self.left.max(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.min(other.right),
            top: self.top.min(other.top),
        })
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }

    /// Clearance between two rectangles: the larger of the horizontal and
    /// vertical gaps, zero when they overlap or touch.
    pub fn clearance(&self, other: &Rect) -> i64 {
        let gap_x = (other.left - self.right).max(self.left - other.right).max(0);
        let gap_y = (other.bottom - self.top).max(self.bottom - other.top).max(0);
        gap_x.max(gap_y)
    }

    /// Shrinks the rectangle by `margin` on every side.
    ///
    /// Returns `None` when nothing with positive area remains.
    pub fn shrink(&self, margin: i64) -> Option<Rect> {
        let inner = Rect {
            left: self.left + margin,
            bottom: self.bottom + margin,
            right: self.right - margin,
            top: self.top - margin,
        };
        (inner.left < inner.right && inner.bottom < inner.top).then_some(inner)
    }

    /// Euclidean distance from the rectangle to a point, zero if inside.
    pub fn distance_to(&self, (x, y): (f64, f64)) -> f64 {
        let dx = (self.left as f64 - x).max(x - self.right as f64).max(0.0);
        let dy = (self.bottom as f64 - y).max(y - self.top as f64).max(0.0);
        dx.hypot(dy)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.left, self.bottom, self.right, self.top
        )
    }
}
