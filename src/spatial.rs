//! Per-frame nearest-neighbour index over contact positions.

use std::collections::HashMap;

use crate::model::Point;

#[derive(Debug, Clone)]
struct Node {
    id: u32,
    point: Point,
    left: Option<usize>,
    right: Option<usize>,
    removed: bool,
}

/// A 2-d tree built once per frame. Removal is lazy: nodes are flagged and
/// skipped by queries, the tree shape never changes.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    root: Option<usize>,
    by_id: HashMap<u32, usize>,
    live: usize,
}

impl SpatialIndex {
    pub fn build(points: impl IntoIterator<Item = (u32, Point)>) -> Self {
        let mut pts: Vec<(u32, Point)> = points.into_iter().collect();
        let mut nodes = Vec::with_capacity(pts.len());
        let root = build_subtree(&mut nodes, &mut pts, 0);
        let by_id = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let live = nodes.len();
        Self {
            nodes,
            root,
            by_id,
            live,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: u32) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|&i| !self.nodes[i].removed)
    }

    /// Returns `false` if the id was absent or already removed.
    pub fn remove(&mut self, id: u32) -> bool {
        match self.by_id.get(&id) {
            Some(&i) if !self.nodes[i].removed => {
                self.nodes[i].removed = true;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn point(&self, id: u32) -> Option<Point> {
        self.by_id.get(&id).map(|&i| self.nodes[i].point)
    }

    /// Closest remaining point; equal distances resolve to the lower id.
    pub fn nearest_to(&self, query: Point) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let mut best = None;
        self.search(self.root, query, 0, &mut best);
        best.map(|(_, id)| id)
    }

    fn search(&self, idx: Option<usize>, q: Point, depth: usize, best: &mut Option<(f32, u32)>) {
        let Some(i) = idx else { return };
        let node = &self.nodes[i];

        if !node.removed {
            let d = dist2(node.point, q);
            let better = match *best {
                None => true,
                Some((bd, bid)) => d < bd || (d == bd && node.id < bid),
            };
            if better {
                *best = Some((d, node.id));
            }
        }

        let diff = axis_value(q, depth) - axis_value(node.point, depth);
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.search(near, q, depth + 1, best);
        if best.is_none_or(|(bd, _)| diff * diff <= bd) {
            self.search(far, q, depth + 1, best);
        }
    }
}

fn build_subtree(nodes: &mut Vec<Node>, pts: &mut [(u32, Point)], depth: usize) -> Option<usize> {
    if pts.is_empty() {
        return None;
    }
    pts.sort_by(|a, b| axis_value(a.1, depth).total_cmp(&axis_value(b.1, depth)));
    let mid = pts.len() / 2;
    let (id, point) = pts[mid];
    let idx = nodes.len();
    nodes.push(Node {
        id,
        point,
        left: None,
        right: None,
        removed: false,
    });
    let (lo, hi) = pts.split_at_mut(mid);
    let left = build_subtree(nodes, lo, depth + 1);
    let right = build_subtree(nodes, &mut hi[1..], depth + 1);
    nodes[idx].left = left;
    nodes[idx].right = right;
    Some(idx)
}

fn axis_value(p: Point, depth: usize) -> f32 {
    if depth % 2 == 0 { p.x } else { p.y }
}

fn dist2(a: Point, b: Point) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}
