//! Connected-component segmentation of a raw intensity field.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::model::{Cluster, Frame, Point, Touch};

/// Row-major 2-d scalar field as delivered by the sensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntensityGrid {
    width: usize,
    height: usize,
    cells: Vec<f32>,
}

impl IntensityGrid {
    /// Wraps a flat row-major buffer of `width * height` cells.
    pub fn new(width: usize, height: usize, cells: Vec<f32>) -> Result<Self> {
        if width.checked_mul(height) != Some(cells.len()) {
            return Err(Error::GridSize {
                width,
                height,
                len: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        let height = rows.len();
        let mut cells = Vec::with_capacity(width * height);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != width {
                return Err(Error::RaggedGrid {
                    row,
                    len: values.len(),
                    expected: width,
                });
            }
            cells.extend(values);
        }
        Self::new(width, height, cells)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.cells[row * self.width + col]
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Union-find over provisional labels with path compression.
#[derive(Debug, Default)]
struct Equivalences {
    parent: Vec<usize>,
}

impl Equivalences {
    fn fresh(&mut self) -> usize {
        let label = self.parent.len();
        self.parent.push(label);
        label
    }

    fn find(&mut self, mut label: usize) -> usize {
        let mut root = label;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[label] != root {
            let next = self.parent[label];
            self.parent[label] = root;
            label = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        let (keep, merge) = if ra <= rb { (ra, rb) } else { (rb, ra) };
        self.parent[merge] = keep;
        keep
    }
}

/// Segments `grid` into clusters of cells strictly above `threshold`.
///
/// One raster pass assigns provisional labels by comparing each cell with
/// its already visited neighbours (NW, N, NE, W) under a same-side-of-
/// threshold predicate. Labels are resolved to their roots afterwards and a
/// second pass gathers the above-threshold cells, numbering clusters in
/// order of first encounter.
pub fn segment(grid: &IntensityGrid, threshold: f32) -> BTreeMap<u32, Cluster> {
    let (w, h) = (grid.width(), grid.height());
    let mut clusters = BTreeMap::new();
    if grid.is_empty() {
        return clusters;
    }

    let above = |v: f32| v > threshold;
    let mut labels = vec![0usize; w * h];
    let mut eq = Equivalences::default();

    for row in 0..h {
        for col in 0..w {
            let here = above(grid.get(row, col));
            let mut label: Option<usize> = None;

            let mut neighbours = [None; 4];
            if row > 0 {
                if col > 0 {
                    neighbours[0] = Some((row - 1, col - 1));
                }
                neighbours[1] = Some((row - 1, col));
                if col + 1 < w {
                    neighbours[2] = Some((row - 1, col + 1));
                }
            }
            if col > 0 {
                neighbours[3] = Some((row, col - 1));
            }

            for (nr, nc) in neighbours.into_iter().flatten() {
                if above(grid.get(nr, nc)) != here {
                    continue;
                }
                let other = eq.find(labels[nr * w + nc]);
                label = Some(match label {
                    None => other,
                    Some(current) => eq.union(current, other),
                });
            }

            labels[row * w + col] = match label {
                Some(l) => l,
                None => eq.fresh(),
            };
        }
    }

    for l in labels.iter_mut() {
        *l = eq.find(*l);
    }

    let mut ids: HashMap<usize, u32> = HashMap::new();
    let mut members: BTreeMap<u32, BTreeSet<usize>> = BTreeMap::new();
    for (idx, &root) in labels.iter().enumerate() {
        if !above(grid.cells[idx]) {
            continue;
        }
        let next = ids.len() as u32;
        let id = *ids.entry(root).or_insert(next);
        members.entry(id).or_default().insert(idx);
    }

    for (id, cells) in members {
        let weight = cells.len();
        let (mut sum_row, mut sum_col) = (0.0f64, 0.0f64);
        for &idx in &cells {
            sum_row += (idx / w) as f64;
            sum_col += (idx % w) as f64;
        }
        let mean = Point::new(
            (sum_col / weight as f64) as f32,
            (sum_row / weight as f64) as f32,
        );
        clusters.insert(
            id,
            Cluster {
                id,
                members: cells,
                mean,
                weight,
            },
        );
    }
    clusters
}

/// Segments `grid` and turns every cluster into a touch of the returned frame.
///
/// Touch ids follow cluster ids; `dim_x`/`dim_y` are the cluster's column
/// and row extent and `intensity` its mean cell value.
pub fn extract_frame(grid: &IntensityGrid, threshold: f32, timestamp_ms: u64) -> Frame {
    let w = grid.width();
    let touches = segment(grid, threshold)
        .into_values()
        .map(|c| {
            let (mut min_r, mut max_r, mut min_c, mut max_c) = (usize::MAX, 0, usize::MAX, 0);
            let mut total = 0.0f32;
            for &idx in &c.members {
                let (r, col) = (idx / w, idx % w);
                min_r = min_r.min(r);
                max_r = max_r.max(r);
                min_c = min_c.min(col);
                max_c = max_c.max(col);
                total += grid.cells[idx];
            }
            Touch {
                id: c.id,
                x: c.mean.x,
                y: c.mean.y,
                dim_x: (max_c - min_c + 1) as f32,
                dim_y: (max_r - min_r + 1) as f32,
                intensity: total / c.weight as f32,
            }
        })
        .collect();
    Frame::new(timestamp_ms, touches)
}
