//! Frame-to-frame correspondence solvers.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::model::Point;
use crate::spatial::SpatialIndex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    /// Exact minimum total distance matching.
    #[default]
    Optimal,
    /// Nearest-neighbour matching, smallest distances committed first.
    Greedy,
}

impl AssignmentStrategy {
    /// Matches `previous[i]` to `current[j]`, returning `(i, j)` pairs sorted by `i`.
    ///
    /// Every index appears at most once on each side. Pairs farther apart
    /// than `max_distance` are discarded.
    pub fn solve(
        &self,
        previous: &[Point],
        current: &[Point],
        max_distance: Option<f32>,
    ) -> Vec<(usize, usize)> {
        if previous.is_empty() || current.is_empty() {
            return Vec::new();
        }
        let mut pairs = match self {
            Self::Optimal => {
                let cost: Vec<Vec<f64>> = previous
                    .iter()
                    .map(|p| current.iter().map(|c| wide_distance(p, c)).collect())
                    .collect();
                optimal_assignment(&cost)
            }
            Self::Greedy => greedy_assignment(previous, current),
        };
        if let Some(limit) = max_distance {
            pairs.retain(|&(i, j)| previous[i].distance(&current[j]) <= limit);
        }
        pairs
    }
}

/// Costs beyond this, infinite or NaN are all treated as this value.
const COST_CAP: f64 = 1.0e15;

fn wide_distance(a: &Point, b: &Point) -> f64 {
    (a.x as f64 - b.x as f64).hypot(a.y as f64 - b.y as f64)
}

/// Minimum-cost assignment over a rectangular cost matrix.
///
/// Kuhn-Munkres with row/column potentials, O(n^3) in the padded size.
/// The matrix is squared up with zero-cost dummy cells, which leaves the
/// optimum over real cells unchanged. Exactly `min(rows, cols)` pairs are
/// returned, sorted by row.
pub fn optimal_assignment<T: Copy + Into<f64>>(cost: &[Vec<T>]) -> Vec<(usize, usize)> {
    let rows = cost.len();
    let cols = cost.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let n = rows.max(cols);
    let inf = f64::INFINITY;
    let mut c = vec![vec![0.0f64; n]; n];
    for (i, row) in cost.iter().enumerate() {
        for (j, &v) in row.iter().enumerate().take(cols) {
            let v: f64 = v.into();
            // potentials must stay finite or the augmenting search never ends
            c[i][j] = if v.is_finite() {
                v.clamp(-COST_CAP, COST_CAP)
            } else {
                COST_CAP
            };
        }
    }

    // 1-based; index 0 is the virtual source column
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut min_v = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0usize;

            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = c[i0 - 1][j - 1] - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let prev = way[j0];
            p[j0] = p[prev];
            j0 = prev;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=n)
        .filter(|&j| p[j] != 0)
        .map(|j| (p[j] - 1, j - 1))
        .filter(|&(i, j)| i < rows && j < cols)
        .collect();
    pairs.sort_unstable();
    pairs
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    distance: f32,
    previous: usize,
    target: u32,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.previous.cmp(&other.previous))
            .then(self.target.cmp(&other.target))
    }
}

/// Greedy nearest-neighbour matching with priority re-query.
///
/// Each previous point queues its nearest current point. The globally
/// smallest pending distance is popped first; if its target was already
/// taken the previous point re-queries the nearest remaining target,
/// otherwise the pair is committed and the target leaves the index.
pub fn greedy_assignment(previous: &[Point], current: &[Point]) -> Vec<(usize, usize)> {
    let mut index = SpatialIndex::build(
        current
            .iter()
            .enumerate()
            .map(|(j, p)| (j as u32, *p)),
    );
    let mut queue = BinaryHeap::new();
    for (i, p) in previous.iter().enumerate() {
        if let Some(target) = index.nearest_to(*p) {
            queue.push(Reverse(Pending {
                distance: p.distance(&current[target as usize]),
                previous: i,
                target,
            }));
        }
    }

    let mut pairs = Vec::new();
    while let Some(Reverse(pending)) = queue.pop() {
        if index.is_empty() {
            break;
        }
        if !index.contains(pending.target) {
            let p = previous[pending.previous];
            if let Some(target) = index.nearest_to(p) {
                queue.push(Reverse(Pending {
                    distance: p.distance(&current[target as usize]),
                    previous: pending.previous,
                    target,
                }));
            }
            continue;
        }
        index.remove(pending.target);
        pairs.push((pending.previous, pending.target as usize));
    }
    pairs.sort_unstable();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(cost: &[Vec<f32>], pairs: &[(usize, usize)]) -> f32 {
        pairs.iter().map(|&(i, j)| cost[i][j]).sum()
    }

    fn brute_force(cost: &[Vec<f32>]) -> f32 {
        fn go(cost: &[Vec<f32>], row: usize, used: &mut Vec<bool>, acc: f32, best: &mut f32) {
            if row == cost.len() {
                *best = best.min(acc);
                return;
            }
            for j in 0..used.len() {
                if !used[j] {
                    used[j] = true;
                    go(cost, row + 1, used, acc + cost[row][j], best);
                    used[j] = false;
                }
            }
        }
        let mut best = f32::INFINITY;
        let mut used = vec![false; cost[0].len()];
        go(cost, 0, &mut used, 0.0, &mut best);
        best
    }

    #[test]
    fn identity_two_by_two() {
        let cost = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(optimal_assignment(&cost), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn swapped_two_by_two() {
        let cost = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(optimal_assignment(&cost), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn optimal_matches_exhaustive_search() {
        // deterministic pseudo-random matrices
        let mut seed = 0x2545_f491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed % 1000) as f32 / 10.0
        };
        for n in 1..=6 {
            for _ in 0..5 {
                let cost: Vec<Vec<f32>> = (0..n).map(|_| (0..n).map(|_| next()).collect()).collect();
                let pairs = optimal_assignment(&cost);
                assert_eq!(pairs.len(), n);
                assert!((total(&cost, &pairs) - brute_force(&cost)).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn rectangular_matrices_match_shorter_side() {
        let wide = vec![vec![5.0, 1.0, 9.0]];
        assert_eq!(optimal_assignment(&wide), vec![(0, 1)]);

        let tall = vec![vec![4.0], vec![2.0], vec![8.0]];
        assert_eq!(optimal_assignment(&tall), vec![(1, 0)]);
    }

    #[test]
    fn non_finite_costs_still_terminate() {
        let cost = vec![vec![f32::INFINITY, 1.0], vec![2.0, f32::NAN]];
        assert_eq!(optimal_assignment(&cost), vec![(0, 1), (1, 0)]);

        let all_bad = vec![vec![f32::NAN, f32::INFINITY], vec![f32::NEG_INFINITY, f32::NAN]];
        assert_eq!(optimal_assignment(&all_bad).len(), 2);
    }

    #[test]
    fn huge_coordinates_are_matched() {
        let previous = [Point::new(0.0, 0.0)];
        let current = [Point::new(3.0e19, 0.0)];
        assert_eq!(
            AssignmentStrategy::Optimal.solve(&previous, &current, None),
            vec![(0, 0)]
        );

        let previous = [Point::new(-3.0e38, 0.0), Point::new(0.0, 0.0)];
        let current = [Point::new(1.0, 0.0), Point::new(3.0e38, 0.0)];
        assert_eq!(
            AssignmentStrategy::Optimal.solve(&previous, &current, None).len(),
            2
        );
    }

    #[test]
    fn greedy_commits_smallest_distance_first() {
        // p0 is nearest to c0, but p1 is even closer to c0 and wins it
        let previous = [Point::new(0.0, 0.0), Point::new(3.0, 0.0)];
        let current = [Point::new(2.0, 0.0), Point::new(-4.0, 0.0)];
        let pairs = greedy_assignment(&previous, &current);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn greedy_leaves_extra_targets_unmatched() {
        let previous = [Point::new(0.0, 0.0)];
        let current = [Point::new(50.0, 0.0), Point::new(1.0, 1.0), Point::new(-30.0, 0.0)];
        assert_eq!(greedy_assignment(&previous, &current), vec![(0, 1)]);
    }

    #[test]
    fn strategies_respect_distance_gate() {
        let previous = [Point::new(0.0, 0.0), Point::new(100.0, 0.0)];
        let current = [Point::new(1.0, 0.0), Point::new(180.0, 0.0)];
        for s in [AssignmentStrategy::Optimal, AssignmentStrategy::Greedy] {
            assert_eq!(s.solve(&previous, &current, Some(10.0)), vec![(0, 0)]);
        }
    }

    #[test]
    fn optimal_avoids_swap_on_crossing_paths() {
        // fingers at (11,16)/(49,44) moving to (12,22)/(48,38)
        let previous = [Point::new(11.0, 16.0), Point::new(49.0, 44.0)];
        let current = [Point::new(48.0, 38.0), Point::new(12.0, 22.0)];
        assert_eq!(
            AssignmentStrategy::Optimal.solve(&previous, &current, None),
            vec![(0, 1), (1, 0)]
        );
    }
}
