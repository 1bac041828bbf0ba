use std::collections::HashMap;

use crate::types::Vector;

type CellKey = (i64, i64, i64);

/// Uniform hash grid over an unbounded domain.
///
/// Items are bucketed by the cells their bounding box overlaps. Queries
/// return candidates in ascending item order with duplicates removed, so
/// callers that fold over the results stay deterministic regardless of the
/// map's internal iteration order.
#[derive(Clone, Debug)]
pub struct SpatialGrid<T> {
    cell_size: f64,
    dimension: usize,
    buckets: HashMap<CellKey, Vec<T>>,
}

impl<T: Copy + Ord> SpatialGrid<T> {
    pub fn new(cell_size: f64, dimension: usize) -> Self {
        Self {
            cell_size,
            dimension,
            buckets: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    #[inline]
    fn coord(&self, value: f64, axis: usize) -> i64 {
        if axis >= self.dimension {
            0
        } else {
            (value / self.cell_size).floor() as i64
        }
    }

    fn cell_range(&self, lo: Vector, hi: Vector) -> [(i64, i64); 3] {
        let mut out = [(0, 0); 3];
        for (axis, range) in out.iter_mut().enumerate() {
            *range = (self.coord(lo.get(axis), axis), self.coord(hi.get(axis), axis));
        }
        out
    }

    fn for_each_cell<F: FnMut(CellKey)>(&self, lo: Vector, hi: Vector, mut f: F) {
        let [(x0, x1), (y0, y1), (z0, z1)] = self.cell_range(lo, hi);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                for cz in z0..=z1 {
                    f((cx, cy, cz));
                }
            }
        }
    }

    /// Insert a point item. Non-finite points are ignored.
    pub fn insert_point(&mut self, point: Vector, item: T) {
        if !point.is_finite() {
            return;
        }
        let key = (
            self.coord(point.x, 0),
            self.coord(point.y, 1),
            self.coord(point.z, 2),
        );
        self.buckets.entry(key).or_default().push(item);
    }

    /// Insert an item spanning the straight piece `a`-`b`.
    pub fn insert_piece(&mut self, a: Vector, b: Vector, item: T) {
        if !a.is_finite() || !b.is_finite() {
            return;
        }
        let lo = a.componentwise_min(b);
        let hi = a.componentwise_max(b);
        let mut keys = Vec::new();
        self.for_each_cell(lo, hi, |key| keys.push(key));
        for key in keys {
            self.buckets.entry(key).or_default().push(item);
        }
    }

    /// Candidates whose cells intersect the box around `center` of half-width
    /// `radius`. Callers still need an exact distance check.
    pub fn query(&self, center: Vector, radius: f64) -> Vec<T> {
        let mut out = Vec::new();
        if !center.is_finite() || !radius.is_finite() {
            return out;
        }
        let r = Vector::new(radius, radius, radius);
        self.for_each_cell(center - r, center + r, |key| {
            if let Some(bucket) = self.buckets.get(&key) {
                out.extend_from_slice(bucket);
            }
        });
        out.sort_unstable();
        out.dedup();
        out
    }
}
