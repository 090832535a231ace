//! Spatial index over cut polygons.
//!
//! Cuts are handed out top to bottom, then right to left, so clustering of
//! multi-cut arrays always starts from the same seed for the same input.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use layex_core::geometry::is_manhattan_ring;
use layex_core::spatial::SpatialIndex;
use layex_core::{BBox, LayerId, Point};

use crate::scale::{to_units, Units};

pub type CutId = usize;

/// One cut polygon on a canonical contact layer.
#[derive(Debug, Clone)]
pub struct Cut {
    pub id: CutId,
    pub layer: LayerId,
    pub outline: Vec<Point>,
    pub bbox: BBox,
    pub manhattan: bool,
}

impl Cut {
    pub fn center(&self) -> Point {
        self.bbox.center()
    }

    fn key(&self) -> PendingKey {
        let c = self.center();
        (Reverse(to_units(c.y)), Reverse(to_units(c.x)), self.id)
    }

    fn size_units(&self) -> (Units, Units) {
        (to_units(self.bbox.width()), to_units(self.bbox.height()))
    }
}

type PendingKey = (Reverse<Units>, Reverse<Units>, CutId);

/// A rectangular array of cuts grown from one seed.
#[derive(Debug, Clone, PartialEq)]
pub struct CutCluster {
    pub seed: CutId,
    /// Member cuts, seed included, in id order.
    pub cuts: Vec<CutId>,
    pub cols: usize,
    pub rows: usize,
    pub bbox: BBox,
}

#[derive(Debug, Default)]
pub struct CutIndex {
    cuts: Vec<Cut>,
    trees: BTreeMap<LayerId, SpatialIndex<CutId>>,
    pending: BTreeMap<LayerId, BTreeSet<PendingKey>>,
    unextracted: Vec<CutId>,
}

impl CutIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: LayerId, outline: Vec<Point>) -> Option<CutId> {
        let bbox = BBox::from_points(&outline)?;
        let id = self.cuts.len();
        let cut = Cut {
            id,
            layer,
            manhattan: is_manhattan_ring(&outline),
            outline,
            bbox,
        };
        self.trees.entry(layer).or_default().insert(id, bbox);
        self.pending.entry(layer).or_default().insert(cut.key());
        self.cuts.push(cut);
        Some(id)
    }

    pub fn get(&self, id: CutId) -> Option<&Cut> {
        self.cuts.get(id)
    }

    /// Remove a cut consumed by a device.
    pub fn remove(&mut self, id: CutId) -> bool {
        let Some(cut) = self.cuts.get(id) else {
            return false;
        };
        let key = cut.key();
        let (layer, bbox) = (cut.layer, cut.bbox);
        let removed = self
            .trees
            .get_mut(&layer)
            .and_then(|t| t.remove(&id, bbox))
            .is_some();
        if let Some(p) = self.pending.get_mut(&layer) {
            p.remove(&key);
        }
        removed
    }

    /// Remove a cut no device fits; it stays in the geometry as leftover.
    pub fn reject(&mut self, id: CutId) {
        if self.remove(id) {
            self.unextracted.push(id);
        }
    }

    pub fn unextracted(&self) -> &[CutId] {
        &self.unextracted
    }

    pub fn layers(&self) -> Vec<LayerId> {
        self.pending.keys().copied().collect()
    }

    /// Live cuts on a layer whose box touches the window, in id order.
    pub fn range_query(&self, layer: LayerId, window: &BBox) -> Vec<CutId> {
        let Some(tree) = self.trees.get(&layer) else {
            return Vec::new();
        };
        let mut ids: Vec<CutId> = tree.query_region(window).iter().map(|e| e.item).collect();
        ids.sort_unstable();
        ids
    }

    /// The highest, then rightmost, cut not yet processed on a layer.
    pub fn next_pending(&self, layer: LayerId) -> Option<CutId> {
        self.pending.get(&layer)?.iter().next().map(|k| k.2)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|p| p.len()).sum()
    }

    /// Grow a cluster of evenly pitched cuts around a seed.
    ///
    /// The window grows by `spacing_limit` each round. A cut joins when it
    /// has the seed's size, its offset from the seed is a whole multiple of
    /// the first pitch seen on each axis, and `feasible` accepts the box of
    /// the enlarged cluster. The result is trimmed to the largest full
    /// rectangle of cuts that still contains the seed.
    pub fn grow_cluster<F>(&self, seed: CutId, spacing_limit: f64, mut feasible: F) -> Option<CutCluster>
    where
        F: FnMut(&BBox) -> bool,
    {
        let seed_cut = self.cuts.get(seed)?;
        let layer = seed_cut.layer;
        let seed_center = seed_cut.center();
        let (sx, sy) = (to_units(seed_center.x), to_units(seed_center.y));
        let seed_size = seed_cut.size_units();
        let pending = self.pending.get(&layer)?;

        let mut members = vec![seed];
        let mut bbox = seed_cut.bbox;
        let mut pitch_x: Option<Units> = None;
        let mut pitch_y: Option<Units> = None;

        if seed_cut.manhattan {
            loop {
                let window = bbox.expand(spacing_limit, spacing_limit);
                let mut candidates: Vec<&Cut> = self
                    .range_query(layer, &window)
                    .into_iter()
                    .filter(|id| !members.contains(id))
                    .filter_map(|id| self.cuts.get(id))
                    .filter(|c| c.manhattan && pending.contains(&c.key()) && c.size_units() == seed_size)
                    .collect();
                // nearest first keeps pitch discovery independent of id order
                candidates.sort_by_key(|c| {
                    let p = c.center();
                    let d = (to_units(p.x) - sx).abs() + (to_units(p.y) - sy).abs();
                    (d, c.key())
                });

                let mut grew = false;
                for cut in candidates {
                    let p = cut.center();
                    let (dx, dy) = (to_units(p.x) - sx, to_units(p.y) - sy);
                    let (mut px, mut py) = (pitch_x, pitch_y);
                    if !on_pitch(dx, &mut px, seed_size.0) || !on_pitch(dy, &mut py, seed_size.1) {
                        continue;
                    }
                    let grown = bbox.union(&cut.bbox);
                    if !feasible(&grown) {
                        continue;
                    }
                    pitch_x = px;
                    pitch_y = py;
                    bbox = grown;
                    members.push(cut.id);
                    grew = true;
                }
                if !grew {
                    break;
                }
            }
        }

        let cells: Vec<(i64, i64, CutId)> = members
            .iter()
            .filter_map(|&id| {
                let p = self.cuts.get(id)?.center();
                let ix = pitch_x.map_or(0, |px| (to_units(p.x) - sx) / px);
                let iy = pitch_y.map_or(0, |py| (to_units(p.y) - sy) / py);
                Some((ix, iy, id))
            })
            .collect();
        let (chosen, cols, rows) = largest_rectangle(&cells);
        let mut cuts: Vec<CutId> = chosen;
        cuts.sort_unstable();
        let bbox = cuts
            .iter()
            .filter_map(|&id| self.cuts.get(id).map(|c| c.bbox))
            .reduce(|a, b| a.union(&b))?;
        Some(CutCluster {
            seed,
            cuts,
            cols,
            rows,
            bbox,
        })
    }
}

/// Check an offset against the pitch of its axis, fixing the pitch from the
/// first non-zero offset.
fn on_pitch(offset: Units, pitch: &mut Option<Units>, cut_size: Units) -> bool {
    if offset == 0 {
        return true;
    }
    match *pitch {
        Some(p) => offset % p == 0,
        None => {
            // overlapping cuts cannot belong to one array
            if offset.abs() < cut_size {
                return false;
            }
            *pitch = Some(offset.abs());
            true
        }
    }
}

/// Largest full rectangle of grid cells containing the cell at (0, 0).
///
/// Ties prefer more columns, then the lowest-left placement. Returns the
/// member ids with the column and row counts.
fn largest_rectangle(cells: &[(i64, i64, CutId)]) -> (Vec<CutId>, usize, usize) {
    let Some(min_x) = cells.iter().map(|c| c.0).min() else {
        return (Vec::new(), 0, 0);
    };
    let min_y = cells.iter().map(|c| c.1).min().unwrap_or(0);
    let max_x = cells.iter().map(|c| c.0).max().unwrap_or(0);
    let max_y = cells.iter().map(|c| c.1).max().unwrap_or(0);
    let w = (max_x - min_x + 1) as usize;
    let h = (max_y - min_y + 1) as usize;

    let mut grid: Vec<Option<CutId>> = vec![None; w * h];
    for &(x, y, id) in cells {
        grid[(y - min_y) as usize * w + (x - min_x) as usize] = Some(id);
    }
    // prefix[r][c] counts occupied cells in rows < r and columns < c
    let mut prefix = vec![0usize; (w + 1) * (h + 1)];
    for r in 0..h {
        for c in 0..w {
            let filled = usize::from(grid[r * w + c].is_some());
            prefix[(r + 1) * (w + 1) + c + 1] =
                filled + prefix[r * (w + 1) + c + 1] + prefix[(r + 1) * (w + 1) + c] - prefix[r * (w + 1) + c];
        }
    }
    let count = |c0: usize, r0: usize, c1: usize, r1: usize| {
        prefix[(r1 + 1) * (w + 1) + c1 + 1] + prefix[r0 * (w + 1) + c0]
            - prefix[r0 * (w + 1) + c1 + 1]
            - prefix[(r1 + 1) * (w + 1) + c0]
    };

    let seed_c = (-min_x) as usize;
    let seed_r = (-min_y) as usize;
    let mut best = (seed_c, seed_r, seed_c, seed_r);
    let mut best_key = (1usize, 1usize);
    for c0 in 0..=seed_c {
        for c1 in seed_c..w {
            for r0 in 0..=seed_r {
                for r1 in seed_r..h {
                    let cols = c1 - c0 + 1;
                    let rows = r1 - r0 + 1;
                    if count(c0, r0, c1, r1) != cols * rows {
                        continue;
                    }
                    let key = (cols * rows, cols);
                    if key > best_key {
                        best_key = key;
                        best = (c0, r0, c1, r1);
                    }
                }
            }
        }
    }

    let (c0, r0, c1, r1) = best;
    let mut ids = Vec::new();
    for r in r0..=r1 {
        for c in c0..=c1 {
            if let Some(id) = grid[r * w + c] {
                ids.push(id);
            }
        }
    }
    (ids, c1 - c0 + 1, r1 - r0 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Vec<Point> {
        BBox::from_corners(x, y, x + size, y + size).outline()
    }

    #[test]
    fn test_pending_order_is_top_then_right() {
        let mut index = CutIndex::new();
        let a = index.insert(5, square(0.0, 0.0, 2.0)).unwrap();
        let b = index.insert(5, square(10.0, 10.0, 2.0)).unwrap();
        let c = index.insert(5, square(0.0, 10.0, 2.0)).unwrap();
        assert_eq!(index.next_pending(5), Some(b));
        index.remove(b);
        assert_eq!(index.next_pending(5), Some(c));
        index.reject(c);
        assert_eq!(index.next_pending(5), Some(a));
        assert_eq!(index.unextracted(), &[c]);
        assert_eq!(index.range_query(5, &BBox::from_corners(-1.0, -1.0, 20.0, 20.0)), vec![a]);
    }

    #[test]
    fn test_two_by_two_cluster() {
        let mut index = CutIndex::new();
        for (x, y) in [(1.0, 1.0), (6.0, 1.0), (1.0, 6.0), (6.0, 6.0)] {
            index.insert(5, square(x, y, 2.0));
        }
        let seed = index.next_pending(5).unwrap();
        let cluster = index.grow_cluster(seed, 5.0, |_| true).unwrap();
        assert_eq!((cluster.cols, cluster.rows), (2, 2));
        assert_eq!(cluster.cuts.len(), 4);
        assert!((cluster.bbox.width() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_off_pitch_cut_is_left_out() {
        let mut index = CutIndex::new();
        index.insert(5, square(0.0, 0.0, 2.0));
        index.insert(5, square(5.0, 0.0, 2.0));
        index.insert(5, square(12.0, 0.0, 2.0));
        // pitch 5 is fixed by the right neighbor; the cut at offset 12 is off it
        let cluster = index.grow_cluster(0, 20.0, |_| true).unwrap();
        assert_eq!(cluster.cuts, vec![0, 1]);
        assert_eq!((cluster.cols, cluster.rows), (2, 1));
    }

    #[test]
    fn test_infeasible_growth_is_rejected() {
        let mut index = CutIndex::new();
        index.insert(5, square(0.0, 0.0, 2.0));
        index.insert(5, square(5.0, 0.0, 2.0));
        let cluster = index.grow_cluster(0, 6.0, |b| b.width() < 5.0).unwrap();
        assert_eq!(cluster.cuts, vec![0]);
        assert_eq!((cluster.cols, cluster.rows), (1, 1));
    }

    #[test]
    fn test_largest_rectangle_prefers_area() {
        // an L of three columns on the bottom row and two rows on the left
        let cells = vec![(0, 0, 0), (1, 0, 1), (2, 0, 2), (0, 1, 3)];
        let (ids, cols, rows) = largest_rectangle(&cells);
        assert_eq!((cols, rows), (3, 1));
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
