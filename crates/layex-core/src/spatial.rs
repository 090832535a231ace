use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::{BBox, Point};

/// An entry in the R-tree spatial index: a payload and its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialEntry<T> {
    pub item: T,
    pub bbox: BBox,
}

impl<T> RTreeObject for SpatialEntry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min.x, self.bbox.min.y],
            [self.bbox.max.x, self.bbox.max.y],
        )
    }
}

/// Incrementally updatable spatial index for point and window queries.
#[derive(Debug, Clone)]
pub struct SpatialIndex<T> {
    tree: RTree<SpatialEntry<T>>,
}

impl<T: PartialEq> SpatialIndex<T> {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn insert(&mut self, item: T, bbox: BBox) {
        self.tree.insert(SpatialEntry { item, bbox });
    }

    /// Remove an entry; both the payload and the box must match.
    pub fn remove(&mut self, item: &T, bbox: BBox) -> Option<T>
    where
        T: Clone,
    {
        let key = SpatialEntry {
            item: item.clone(),
            bbox,
        };
        self.tree.remove(&key).map(|e| e.item)
    }

    /// Find all entries whose bounding box contains the given point.
    pub fn query_point(&self, point: &Point) -> Vec<&SpatialEntry<T>> {
        let envelope = AABB::from_point([point.x, point.y]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .collect()
    }

    /// Find all entries that intersect (or touch) the given box.
    pub fn query_region(&self, region: &BBox) -> Vec<&SpatialEntry<T>> {
        let envelope = AABB::from_corners(
            [region.min.x, region.min.y],
            [region.max.x, region.max.y],
        );
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .collect()
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl<T: PartialEq> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_query() {
        let mut index = SpatialIndex::new();
        index.insert(0usize, BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        index.insert(1usize, BBox::new(Point::new(20.0, 20.0), Point::new(30.0, 30.0)));

        // Point inside first entry
        let results = index.query_point(&Point::new(5.0, 5.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item, 0);

        // Point inside second entry
        let results = index.query_point(&Point::new(25.0, 25.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item, 1);

        // Window query
        let window = BBox::new(Point::new(-5.0, -5.0), Point::new(15.0, 15.0));
        let results = index.query_region(&window);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_remove_entry() {
        let mut index = SpatialIndex::new();
        let bbox = BBox::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        index.insert(7u32, bbox);
        index.insert(8u32, bbox);
        assert_eq!(index.remove(&7, bbox), Some(7));
        assert_eq!(index.remove(&7, bbox), None);
        assert_eq!(index.len(), 1);
    }
}
