//! Skyline of placed modules used to resolve y coordinates during packing.
//!
//! The contour is a doubly linked list of placed modules ordered by right
//! edge. Each entry's visible segment runs from the previous entry's right
//! edge to its own right edge at the height of its top edge. Placing a
//! module walks only the segments it covers and splices it in, dropping the
//! segments it hides.

use super::NodeIdx;
use qbplan_common::Rect;

/// Skyline neighbours of one placed module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContourLink {
    /// The next skyline step to the right.
    pub front: Option<NodeIdx>,
    /// The previous skyline step to the left.
    pub back: Option<NodeIdx>,
}

/// One visible step of the skyline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// The module forming this step.
    pub node: NodeIdx,
    /// Left end: the previous step's right edge, or the module's own left edge.
    pub start: i64,
    /// Right end: the module's right edge.
    pub end: i64,
    /// Height of the step.
    pub top: i64,
}

/// The skyline built during one packing pass.
#[derive(Clone, Debug, Default)]
pub struct Contour {
    root: Option<NodeIdx>,
    links: Vec<ContourLink>,
    rects: Vec<Option<Rect>>,
}

impl Contour {
    /// Creates an empty contour for a tree with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            root: None,
            links: vec![ContourLink::default(); capacity],
            rects: vec![None; capacity],
        }
    }

    /// The leftmost skyline step.
    pub fn root(&self) -> Option<NodeIdx> {
        self.root
    }

    /// Skyline links of `node`.
    pub fn link(&self, node: NodeIdx) -> ContourLink {
        self.links.get(node.index()).copied().unwrap_or_default()
    }

    /// The rectangle placed for `node`, if placed in this pass.
    pub fn rect(&self, node: NodeIdx) -> Option<Rect> {
        self.rects.get(node.index()).copied().flatten()
    }

    fn link_mut(&mut self, node: NodeIdx) -> &mut ContourLink {
        &mut self.links[node.index()]
    }

    /// Starts the skyline with the tree root.
    pub(crate) fn place_root(&mut self, node: NodeIdx, rect: Rect) {
        self.rects[node.index()] = Some(rect);
        *self.link_mut(node) = ContourLink::default();
        self.root = Some(node);
    }

    /// Walks the skyline from `start` until a step reaching `right` is found.
    ///
    /// Returns the highest `top + lift(owner)` seen and the step that should
    /// follow a module ending at `right`.
    fn walk<F>(&self, start: Option<NodeIdx>, right: i64, lift: &F) -> (i64, Option<NodeIdx>)
    where
        F: Fn(NodeIdx) -> i64,
    {
        let mut y = 0;
        let mut cursor = start;
        while let Some(p) = cursor {
            let Some(r) = self.rect(p) else { break };
            y = y.max(r.top.saturating_add(lift(p)));
            if r.right > right {
                return (y, Some(p));
            }
            if r.right == right {
                return (y, self.link(p).front);
            }
            cursor = self.link(p).front;
        }
        (y, None)
    }

    fn splice_front(&mut self, node: NodeIdx, next: Option<NodeIdx>) {
        self.link_mut(node).front = next;
        if let Some(n) = next {
            self.link_mut(n).back = Some(node);
        }
    }

    /// Resolves the y coordinate of a left child placed to the right of
    /// `parent`, spanning `[x, right)`, and splices it after `parent`.
    pub(crate) fn resolve_beside<F>(&mut self, parent: NodeIdx, node: NodeIdx, right: i64, lift: F) -> i64
    where
        F: Fn(NodeIdx) -> i64,
    {
        let start = self.link(parent).front;
        let (y, next) = self.walk(start, right, &lift);
        self.link_mut(parent).front = Some(node);
        self.link_mut(node).back = Some(parent);
        self.splice_front(node, next);
        y
    }

    /// Resolves the y coordinate of a right child stacked on `parent`,
    /// spanning `[parent.left, right)`, and splices it in place of the steps it covers.
    pub(crate) fn resolve_above<F>(&mut self, parent: NodeIdx, node: NodeIdx, right: i64, lift: F) -> i64
    where
        F: Fn(NodeIdx) -> i64,
    {
        let (y, next) = self.walk(Some(parent), right, &lift);
        let before = self.link(parent).back;
        self.link_mut(node).back = before;
        match before {
            Some(b) => self.link_mut(b).front = Some(node),
            None => self.root = Some(node),
        }
        self.splice_front(node, next);
        y
    }

    /// Records the final rectangle of a placed module.
    pub(crate) fn set_rect(&mut self, node: NodeIdx, rect: Rect) {
        self.rects[node.index()] = Some(rect);
    }

    /// Skyline steps from left to right.
    pub fn iter(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        std::iter::successors(self.root, move |n| self.link(*n).front)
    }

    /// Visible segments from left to right.
    pub fn segments(&self) -> Vec<Segment> {
        let mut out: Vec<Segment> = Vec::new();
        for node in self.iter() {
            let Some(rect) = self.rect(node) else { break };
            let start = out.last().map_or(rect.left, |prev| prev.end);
            out.push(Segment {
                node,
                start,
                end: rect.right,
                top: rect.top,
            });
        }
        out
    }

    /// Height of the skyline over `x`, zero where nothing is placed.
    pub fn height_at(&self, x: i64) -> i64 {
        self.segments()
            .iter()
            .find(|s| s.start <= x && x < s.end)
            .map_or(0, |s| s.top)
    }
}
