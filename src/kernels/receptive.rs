//! Per-column kernel math: receptive-field geometry, patch gathering,
//! distance scoring and competitive top-k selection.
//!
//! A receptive field of radius `r` around a projected centre covers
//! `(2r+1)^2` grid offsets, each holding `depth` entries. Weight vectors are
//! laid out offset-major, so entry `z` of offset `o` lives at `o * depth + z`.

use std::cmp::Ordering;

use ndarray::ArrayView1;

use crate::core::field::{Field, FieldSize};

/// Project a coordinate of a `from`-sized axis onto a `to`-sized axis.
pub fn project(coord: usize, from: usize, to: usize) -> isize {
    let centre = ((coord as f32 + 0.5) * to as f32 / from as f32) as isize;
    centre.min(to as isize - 1)
}

/// Centre of column `(x, y)` of a `from` grid on a `to` grid.
pub fn project_center(x: usize, y: usize, from: FieldSize, to: FieldSize) -> (isize, isize) {
    (
        project(x, from.width, to.width),
        project(y, from.height, to.height),
    )
}

/// Number of weights per unit for a radius and visible depth.
pub fn patch_len(radius: usize, depth: usize) -> usize {
    let diam = 2 * radius + 1;
    diam * diam * depth
}

/// The in-bounds entries of a receptive field, tagged with their weight index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    entries: Vec<(usize, f32)>,
}

impl Patch {
    /// Gather the entries of `field` within `radius` of `center`.
    ///
    /// Out-of-bounds offsets are skipped; with `ignore_center` the centre
    /// offset is skipped too.
    pub fn gather(field: &Field, center: (isize, isize), radius: usize, ignore_center: bool) -> Self {
        let size = field.size();
        let depth = field.depth();
        let r = radius as isize;
        let diam = 2 * r + 1;
        let mut entries = Vec::with_capacity(patch_len(radius, depth));

        for dy in -r..=r {
            for dx in -r..=r {
                if ignore_center && dx == 0 && dy == 0 {
                    continue;
                }
                let (vx, vy) = (center.0 + dx, center.1 + dy);
                if !size.contains(vx, vy) {
                    continue;
                }
                let offset = ((dy + r) * diam + (dx + r)) as usize;
                for (z, &v) in field.column(vx as usize, vy as usize).iter().enumerate() {
                    entries.push((offset * depth + z, v));
                }
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[(usize, f32)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no entry carries signal.
    pub fn is_silent(&self) -> bool {
        self.entries.iter().all(|(_, v)| *v == 0.0)
    }

    /// Sum of squared entries.
    pub fn energy(&self) -> f32 {
        self.entries.iter().map(|(_, v)| v * v).sum()
    }

    /// Mean squared distance between the entries and a unit's weights.
    pub fn mean_squared_distance(&self, weights: ArrayView1<'_, f32>) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .entries
            .iter()
            .map(|&(i, v)| {
                let d = weights[i] - v;
                d * d
            })
            .sum();
        sum / self.entries.len() as f32
    }

    /// Weighted sum of the entries.
    pub fn dot(&self, weights: ArrayView1<'_, f32>) -> f32 {
        self.entries.iter().map(|&(i, v)| weights[i] * v).sum()
    }
}

/// Indices of the `k` smallest scores, best first; ties go to the lower index.
pub fn select_smallest(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// Indices of the `k` largest scores, best first; ties go to the lower index.
pub fn select_largest(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// A rival beats a column with a strictly lower score, or an equal score at
/// a lower row-major index.
fn beats(rival: f32, rival_index: usize, own: f32, own_index: usize) -> bool {
    match rival.total_cmp(&own) {
        Ordering::Less => true,
        Ordering::Equal => rival_index < own_index,
        Ordering::Greater => false,
    }
}

/// Whether `(x, y)` wins its Chebyshev neighbourhood of `radius`.
///
/// `best(x, y)` is the column's best score (lower is better, `None` for
/// inactive columns).
pub fn wins_neighborhood(
    x: usize,
    y: usize,
    radius: usize,
    size: FieldSize,
    best: impl Fn(usize, usize) -> Option<f32>,
) -> bool {
    let Some(own) = best(x, y) else {
        return false;
    };
    let own_index = y * size.width + x;
    let r = radius as isize;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx == 0 && dy == 0 {
                continue;
            }
            let (nx, ny) = (x as isize + dx, y as isize + dy);
            if !size.contains(nx, ny) {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if let Some(other) = best(nx, ny) {
                if beats(other, ny * size.width + nx, own, own_index) {
                    return false;
                }
            }
        }
    }
    true
}

/// Whether `(x, y)` has the best score of its chunk.
///
/// The grid is cut into `chunk`-sized tiles starting at the origin; tiles on
/// the far edges may be smaller.
pub fn wins_tile(
    x: usize,
    y: usize,
    chunk: FieldSize,
    size: FieldSize,
    best: impl Fn(usize, usize) -> Option<f32>,
) -> bool {
    let Some(own) = best(x, y) else {
        return false;
    };
    let own_index = y * size.width + x;
    let (tx, ty) = (x - x % chunk.width, y - y % chunk.height);
    for ny in ty..(ty + chunk.height).min(size.height) {
        for nx in tx..(tx + chunk.width).min(size.width) {
            if (nx, ny) == (x, y) {
                continue;
            }
            if let Some(other) = best(nx, ny) {
                if beats(other, ny * size.width + nx, own, own_index) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_project_identity_and_scaling() {
        for x in 0..8 {
            assert_eq!(project(x, 8, 8), x as isize);
        }
        // 4 -> 8: centres land on odd cells
        assert_eq!(project(0, 4, 8), 1);
        assert_eq!(project(3, 4, 8), 7);
        // 8 -> 4: pairs share a centre
        assert_eq!(project(6, 8, 4), 3);
        assert_eq!(project(7, 8, 4), 3);
        // never out of range
        assert_eq!(project(0, 1, 1), 0);
    }

    #[test]
    fn test_patch_interior() {
        let size = FieldSize::new(5, 5);
        let f = Field::from_fn(size, |x, y| (y * 5 + x) as f32);
        let p = Patch::gather(&f, (2, 2), 1, false);
        assert_eq!(p.len(), 9);
        // offset 4 is the centre
        assert!(p.entries().contains(&(4, 12.0)));
        assert!(p.entries().contains(&(0, 6.0)));
    }

    #[test]
    fn test_patch_corner_skips_out_of_bounds() {
        let size = FieldSize::new(3, 3);
        let f = Field::from_fn(size, |_, _| 1.0);
        let p = Patch::gather(&f, (0, 0), 1, false);
        assert_eq!(p.len(), 4);
        let ignore = Patch::gather(&f, (0, 0), 1, true);
        assert_eq!(ignore.len(), 3);
        assert!(ignore.entries().iter().all(|(i, _)| *i != 4));
    }

    #[test]
    fn test_patch_depth_layout() {
        let mut f = Field::with_depth(FieldSize::new(1, 1), 3);
        f.set_unit(0, 0, 2, 7.0);
        let p = Patch::gather(&f, (0, 0), 1, false);
        // centre offset 4 of a radius-1 field, depth 3
        assert_eq!(p.entries(), &[(12, 0.0), (13, 0.0), (14, 7.0)]);
        assert!(!p.is_silent());
        assert!((p.energy() - 49.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_and_dot() {
        let f = Field::from_fn(FieldSize::new(1, 1), |_, _| 2.0);
        let p = Patch::gather(&f, (0, 0), 0, false);
        let w = Array1::from_vec(vec![1.0]);
        assert!((p.mean_squared_distance(w.view()) - 1.0).abs() < 1e-6);
        assert!((p.dot(w.view()) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_ties_prefer_lower_index() {
        let scores = [0.5, 0.1, 0.5, 0.1, 0.9];
        assert_eq!(select_smallest(&scores, 3), vec![1, 3, 0]);
        assert_eq!(select_largest(&scores, 2), vec![4, 0]);
        assert_eq!(select_smallest(&scores, 10).len(), 5);
    }

    #[test]
    fn test_neighborhood_suppression() {
        let size = FieldSize::new(3, 1);
        let scores = [Some(0.2), Some(0.1), None];
        let best = |x: usize, _y: usize| scores[x];
        assert!(!wins_neighborhood(0, 0, 1, size, best));
        assert!(wins_neighborhood(1, 0, 1, size, best));
        assert!(!wins_neighborhood(2, 0, 1, size, best));
        // radius 0 disables suppression
        assert!(wins_neighborhood(0, 0, 0, size, best));

        let tied = [Some(0.1), Some(0.1), Some(0.1)];
        let best = |x: usize, _y: usize| tied[x];
        assert!(wins_neighborhood(0, 0, 1, size, best));
        assert!(!wins_neighborhood(1, 0, 1, size, best));
        assert!(!wins_neighborhood(2, 0, 1, size, best));
        assert!(wins_neighborhood(2, 0, 0, size, best));
    }

    #[test]
    fn test_tile_winners() {
        // 3x2 grid cut into 2x2 tiles: {0,1,3,4} and the narrow edge {2,5}
        let size = FieldSize::new(3, 2);
        let chunk = FieldSize::new(2, 2);
        let scores = [Some(0.4), Some(0.3), Some(0.9), Some(0.3), None, None];
        let best = |x: usize, y: usize| scores[y * 3 + x];
        let winners: Vec<usize> = (0..6)
            .filter(|i| wins_tile(i % 3, i / 3, chunk, size, best))
            .collect();
        // (1,0) and (0,1) tie; the lower index keeps the tile
        assert_eq!(winners, vec![1, 2]);

        // 1x1 tiles: every scored column wins
        let unit = FieldSize::new(1, 1);
        assert_eq!((0..6).filter(|i| wins_tile(i % 3, i / 3, unit, size, best)).count(), 4);
    }
}
