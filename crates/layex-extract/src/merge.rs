//! Per-layer polygon sets.
//!
//! A [`LayerMerge`] holds, for every canonical layer, the union of all
//! geometry added to it as a `geo` multipolygon in scaled coordinates.
//! Extraction keeps two of them: the working merge that recognized features
//! are subtracted from, and the original merge that answers every "does it
//! fit" question. Callers only see layout units; the scaled representation
//! never leaves this module.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, LineString, MultiPolygon};

use layex_core::geometry::{is_manhattan_ring, ring_area, segment_outline, EPSILON};
use layex_core::{BBox, GeomPrimitive, LayerId, Point, Polygon, Rect};

use crate::scale::{scale_down, scale_up, SCALE};

type GeoPolygon = geo::Polygon<f64>;

/// Scaled area below which a shape counts as a thin boundary strip.
fn tolerance_for(perimeter: f64) -> f64 {
    (perimeter * 0.5).max(1.0)
}

/// A maximal connected area of one layer, in layout units.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub layer: LayerId,
    /// Counter-clockwise, no closing point, starting at the lowest-left vertex.
    pub outline: Vec<Point>,
    /// Clockwise.
    pub holes: Vec<Vec<Point>>,
}

impl Region {
    pub fn bbox(&self) -> BBox {
        BBox::from_points(&self.outline)
            .unwrap_or_else(|| BBox::new(Point::new(0.0, 0.0), Point::new(0.0, 0.0)))
    }

    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_area(h).abs()).sum();
        ring_area(&self.outline).abs() - holes
    }

    pub fn vertex_count(&self) -> usize {
        self.outline.len() + self.holes.iter().map(|h| h.len()).sum::<usize>()
    }

    pub fn is_manhattan(&self) -> bool {
        is_manhattan_ring(&self.outline) && self.holes.iter().all(|h| is_manhattan_ring(h))
    }

    /// The region's box if the region is exactly an axis-aligned rectangle.
    pub fn as_rect(&self) -> Option<BBox> {
        if self.holes.is_empty() && self.outline.len() == 4 && self.is_manhattan() {
            Some(self.bbox())
        } else {
            None
        }
    }

    /// All boundary rings, outline first.
    pub fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.outline).chain(self.holes.iter())
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(self.layer, self.outline.clone()).with_holes(self.holes.clone())
    }

    /// Rectangles come back as [`Rect`], everything else as a polygon.
    pub fn to_primitive(&self) -> GeomPrimitive {
        match self.as_rect() {
            Some(b) => GeomPrimitive::Rect(Rect::new(self.layer, b.min.x, b.min.y, b.max.x, b.max.y)),
            None => GeomPrimitive::Polygon(self.to_polygon()),
        }
    }
}

fn to_ring(points: &[Point]) -> LineString<f64> {
    LineString::new(
        points
            .iter()
            .map(|p| Coord {
                x: scale_up(p.x),
                y: scale_up(p.y),
            })
            .collect(),
    )
}

fn to_geo(outline: &[Point], holes: &[Vec<Point>]) -> Option<MultiPolygon<f64>> {
    if outline.len() < 3 || ring_area(outline).abs() <= EPSILON {
        return None;
    }
    // exterior counter-clockwise, holes clockwise, whatever the caller passed
    let oriented = |ring: &[Point], ccw: bool| {
        let mut ring = ring.to_vec();
        if (ring_area(&ring) > 0.0) != ccw {
            ring.reverse();
        }
        to_ring(&ring)
    };
    let interiors = holes
        .iter()
        .filter(|h| h.len() >= 3)
        .map(|h| oriented(h, false))
        .collect();
    Some(MultiPolygon::new(vec![GeoPolygon::new(
        oriented(outline, true),
        interiors,
    )]))
}

fn perimeter(points: &[Point]) -> f64 {
    (0..points.len())
        .map(|i| points[i].distance_to(&points[(i + 1) % points.len()]))
        .sum()
}

/// Drop the closing point, repeated vertices, and collinear vertices of a
/// scaled ring.
fn clean_ring(ring: &LineString<f64>) -> Vec<Point> {
    let mut pts: Vec<Point> = ring.0.iter().map(|c| Point::new(c.x, c.y)).collect();
    if pts.len() > 1 && pts[0].approx_eq(&pts[pts.len() - 1], 1e-6) {
        pts.pop();
    }
    loop {
        let n = pts.len();
        if n < 3 {
            return Vec::new();
        }
        let mut removed = false;
        for i in 0..n {
            let prev = pts[(i + n - 1) % n];
            let cur = pts[i];
            let next = pts[(i + 1) % n];
            let a = cur - prev;
            let b = next - cur;
            let degenerate = a.length() <= 1e-6
                || a.cross(&b).abs() <= 1e-9 * (a.length() * b.length()).max(1.0);
            if degenerate {
                pts.remove(i);
                removed = true;
                break;
            }
        }
        if !removed {
            break;
        }
    }
    pts.into_iter()
        .map(|p| Point::new(scale_down(p.x), scale_down(p.y)))
        .collect()
}

/// Orient a ring and start it at its lowest-left vertex.
fn normalize_ring(mut ring: Vec<Point>, ccw: bool) -> Vec<Point> {
    if (ring_area(&ring) > 0.0) != ccw {
        ring.reverse();
    }
    let start = (0..ring.len())
        .min_by(|&a, &b| {
            ring[a]
                .y
                .total_cmp(&ring[b].y)
                .then(ring[a].x.total_cmp(&ring[b].x))
        })
        .unwrap_or(0);
    ring.rotate_left(start);
    ring
}

/// Union of geometry per canonical layer.
#[derive(Debug, Clone, Default)]
pub struct LayerMerge {
    layers: BTreeMap<LayerId, MultiPolygon<f64>>,
}

impl LayerMerge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers holding a non-negligible amount of geometry, ascending.
    pub fn layers(&self) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|(_, mp)| mp.unsigned_area() > 0.0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.layers().is_empty()
    }

    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.layers
            .get(&layer)
            .is_some_and(|mp| mp.unsigned_area() > 0.0)
    }

    pub fn add_polygon(&mut self, layer: LayerId, outline: &[Point], holes: &[Vec<Point>]) {
        let Some(shape) = to_geo(outline, holes) else {
            return;
        };
        let merged = match self.layers.get(&layer) {
            Some(existing) => existing.union(&shape),
            None => shape,
        };
        self.layers.insert(layer, merged);
    }

    pub fn add_outline(&mut self, layer: LayerId, outline: &[Point]) {
        self.add_polygon(layer, outline, &[]);
    }

    pub fn add_bbox(&mut self, layer: LayerId, bbox: &BBox) {
        self.add_outline(layer, &bbox.outline());
    }

    pub fn add_primitive(&mut self, layer: LayerId, geom: &GeomPrimitive) {
        match geom {
            GeomPrimitive::Polygon(p) => self.add_polygon(layer, &p.vertices, &p.holes),
            other => {
                for outline in other.outlines() {
                    self.add_outline(layer, &outline);
                }
            }
        }
    }

    pub fn add_region(&mut self, region: &Region) {
        self.add_polygon(region.layer, &region.outline, &region.holes);
    }

    /// Remove a shape and return the area actually removed, in layout units.
    pub fn subtract_polygon(
        &mut self,
        layer: LayerId,
        outline: &[Point],
        holes: &[Vec<Point>],
    ) -> f64 {
        let Some(shape) = to_geo(outline, holes) else {
            return 0.0;
        };
        let Some(existing) = self.layers.get(&layer) else {
            return 0.0;
        };
        let removed = existing.intersection(&shape).unsigned_area();
        if removed <= 0.0 {
            return 0.0;
        }
        let rest = existing.difference(&shape);
        self.layers.insert(layer, rest);
        removed / (SCALE * SCALE)
    }

    pub fn subtract_outline(&mut self, layer: LayerId, outline: &[Point]) -> f64 {
        self.subtract_polygon(layer, outline, &[])
    }

    pub fn subtract_bbox(&mut self, layer: LayerId, bbox: &BBox) -> f64 {
        self.subtract_outline(layer, &bbox.outline())
    }

    pub fn subtract_region(&mut self, region: &Region) -> f64 {
        self.subtract_polygon(region.layer, &region.outline, &region.holes)
    }

    /// Total area of a layer in layout units.
    pub fn area(&self, layer: LayerId) -> f64 {
        self.layers
            .get(&layer)
            .map_or(0.0, |mp| mp.unsigned_area() / (SCALE * SCALE))
    }

    pub fn bbox(&self, layer: LayerId) -> Option<BBox> {
        let rect = self.layers.get(&layer)?.bounding_rect()?;
        Some(BBox::from_corners(
            scale_down(rect.min().x),
            scale_down(rect.min().y),
            scale_down(rect.max().x),
            scale_down(rect.max().y),
        ))
    }

    /// Area of a layer covered by a shape, in layout units.
    pub fn overlap_area(&self, layer: LayerId, outline: &[Point]) -> f64 {
        self.overlap_scaled(layer, outline) / (SCALE * SCALE)
    }

    fn overlap_scaled(&self, layer: LayerId, outline: &[Point]) -> f64 {
        match (self.layers.get(&layer), to_geo(outline, &[])) {
            (Some(existing), Some(shape)) => existing.intersection(&shape).unsigned_area(),
            _ => 0.0,
        }
    }

    /// True if the shape lies inside the layer, up to a one-unit boundary strip.
    pub fn contains(&self, layer: LayerId, outline: &[Point]) -> bool {
        let Some(existing) = self.layers.get(&layer) else {
            return false;
        };
        let Some(shape) = to_geo(outline, &[]) else {
            return false;
        };
        if let (Some(have), Some(want)) = (self.bbox(layer), BBox::from_points(outline)) {
            let slack = 1.0 / SCALE;
            if !have.expand(slack, slack).contains_bbox(&want) {
                return false;
            }
        }
        let outside = shape.difference(existing).unsigned_area();
        outside <= tolerance_for(perimeter(outline) * SCALE)
    }

    pub fn contains_bbox(&self, layer: LayerId, bbox: &BBox) -> bool {
        self.contains(layer, &bbox.outline())
    }

    /// Point-in-region test, boundary included.
    pub fn contains_point(&self, layer: LayerId, at: &Point) -> bool {
        let Some(existing) = self.layers.get(&layer) else {
            return false;
        };
        let c = Coord {
            x: at.x * SCALE,
            y: at.y * SCALE,
        };
        existing.0.iter().any(|poly| poly.intersects(&c))
    }

    /// True if the shape overlaps the layer by more than a boundary strip.
    pub fn intersects(&self, layer: LayerId, outline: &[Point]) -> bool {
        self.overlap_scaled(layer, outline) > tolerance_for(perimeter(outline) * SCALE)
    }

    /// The common area of several layers, placed on `into` in a new merge.
    pub fn intersect(&self, layers: &[LayerId], into: LayerId) -> LayerMerge {
        let mut out = LayerMerge::new();
        let mut iter = layers.iter();
        let Some(first) = iter.next() else {
            return out;
        };
        let Some(mut acc) = self.layers.get(first).cloned() else {
            return out;
        };
        for layer in iter {
            match self.layers.get(layer) {
                Some(mp) => acc = acc.intersection(mp),
                None => return out,
            }
        }
        out.layers.insert(into, acc);
        out
    }

    /// Whether a wire span of the given width fits inside the layer.
    ///
    /// Extended ends reach half the width past their point. On failure the
    /// span is retried with the head, then the tail, then both ends
    /// un-extended; the flags are updated to the variant that fits.
    pub fn candidate_fits(
        &self,
        layer: LayerId,
        p1: Point,
        p2: Point,
        width: f64,
        head_extend: &mut bool,
        tail_extend: &mut bool,
    ) -> bool {
        let (h, t) = (*head_extend, *tail_extend);
        let mut attempts = vec![(h, t)];
        for option in [(false, t), (h, false), (false, false)] {
            if !attempts.contains(&option) {
                attempts.push(option);
            }
        }
        for (h, t) in attempts {
            let ext = |on: bool| if on { width / 2.0 } else { 0.0 };
            let Some(outline) = segment_outline(p1, p2, width, ext(h), ext(t)) else {
                continue;
            };
            if self.contains(layer, &outline) {
                *head_extend = h;
                *tail_extend = t;
                return true;
            }
        }
        false
    }

    /// Connected regions of a layer in a stable order (bottom to top, then
    /// left to right). Numerically empty pieces are skipped.
    pub fn regions(&self, layer: LayerId) -> Vec<Region> {
        let Some(mp) = self.layers.get(&layer) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for poly in &mp.0 {
            let scaled_perimeter: f64 = poly
                .exterior()
                .lines()
                .map(|l| (l.end.x - l.start.x).hypot(l.end.y - l.start.y))
                .sum();
            if poly.unsigned_area() <= tolerance_for(scaled_perimeter) {
                continue;
            }
            let outline = clean_ring(poly.exterior());
            if outline.len() < 3 {
                continue;
            }
            let holes = poly
                .interiors()
                .iter()
                .map(clean_ring)
                .filter(|h| h.len() >= 3)
                .map(|h| normalize_ring(h, false))
                .collect();
            out.push(Region {
                layer,
                outline: normalize_ring(outline, true),
                holes,
            });
        }
        out.sort_by(|a, b| {
            let (ba, bb) = (a.bbox(), b.bbox());
            ba.min
                .y
                .total_cmp(&bb.min.y)
                .then(ba.min.x.total_cmp(&bb.min.x))
                .then(ba.max.y.total_cmp(&bb.max.y))
                .then(ba.max.x.total_cmp(&bb.max.x))
        });
        out
    }

    /// Crumbs that boolean subtraction leaves along shared edges.
    pub fn negligible_area(&self, layer: LayerId) -> f64 {
        let Some(mp) = self.layers.get(&layer) else {
            return 0.0;
        };
        mp.0.iter()
            .filter(|poly| {
                let p: f64 = poly
                    .exterior()
                    .lines()
                    .map(|l| (l.end.x - l.start.x).hypot(l.end.y - l.start.y))
                    .sum();
                poly.unsigned_area() <= tolerance_for(p)
            })
            .map(|poly| poly.unsigned_area())
            .sum::<f64>()
            / (SCALE * SCALE)
    }

    /// Forget a layer entirely.
    pub fn clear_layer(&mut self, layer: LayerId) {
        self.layers.remove(&layer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Vec<Point> {
        BBox::from_corners(x1, y1, x2, y2).outline()
    }

    #[test]
    fn test_union_forms_one_region() {
        let mut m = LayerMerge::new();
        m.add_outline(1, &rect(0.0, 0.0, 10.0, 2.0));
        m.add_outline(1, &rect(0.0, 0.0, 2.0, 10.0));
        let regions = m.regions(1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].outline.len(), 6);
        assert!((regions[0].area() - 36.0).abs() < 1e-9);
        assert!(regions[0].outline[0].approx_eq(&Point::new(0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_contains_and_intersects() {
        let mut m = LayerMerge::new();
        m.add_outline(1, &rect(0.0, 0.0, 10.0, 10.0));
        assert!(m.contains(1, &rect(0.0, 0.0, 10.0, 10.0)));
        assert!(m.contains(1, &rect(2.0, 2.0, 4.0, 4.0)));
        assert!(!m.contains(1, &rect(8.0, 8.0, 11.0, 11.0)));
        assert!(!m.contains(2, &rect(2.0, 2.0, 4.0, 4.0)));
        // touching along an edge is not an overlap
        assert!(!m.intersects(1, &rect(10.0, 0.0, 12.0, 2.0)));
        assert!(m.intersects(1, &rect(9.0, 0.0, 12.0, 2.0)));
        assert!(m.contains_point(1, &Point::new(10.0, 5.0)));
        assert!(!m.contains_point(1, &Point::new(10.5, 5.0)));
    }

    #[test]
    fn test_subtract_reports_removed_area() {
        let mut m = LayerMerge::new();
        m.add_outline(1, &rect(0.0, 0.0, 10.0, 10.0));
        let removed = m.subtract_outline(1, &rect(5.0, 5.0, 15.0, 15.0));
        assert!((removed - 25.0).abs() < 1e-9);
        assert!((m.area(1) - 75.0).abs() < 1e-9);
        assert_eq!(m.subtract_outline(1, &rect(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_region_with_hole() {
        let mut m = LayerMerge::new();
        m.add_outline(3, &rect(0.0, 0.0, 10.0, 10.0));
        m.subtract_outline(3, &rect(4.0, 4.0, 6.0, 6.0));
        let regions = m.regions(3);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert!(ring_area(&regions[0].holes[0]) < 0.0);
        assert!(regions[0].as_rect().is_none());
    }

    #[test]
    fn test_candidate_fits_drops_extension() {
        let mut m = LayerMerge::new();
        m.add_outline(1, &rect(0.0, 0.0, 10.0, 2.0));
        let (mut h, mut t) = (true, true);
        assert!(m.candidate_fits(1, Point::new(1.0, 1.0), Point::new(9.0, 1.0), 2.0, &mut h, &mut t));
        assert!(h && t);
        let (mut h, mut t) = (true, true);
        assert!(m.candidate_fits(1, Point::new(0.0, 1.0), Point::new(9.0, 1.0), 2.0, &mut h, &mut t));
        assert!(!h && t);
        let (mut h, mut t) = (true, true);
        assert!(!m.candidate_fits(1, Point::new(0.0, 1.0), Point::new(9.0, 1.0), 3.0, &mut h, &mut t));
    }

    #[test]
    fn test_intersect_layers() {
        let mut m = LayerMerge::new();
        m.add_outline(1, &rect(0.0, 4.0, 20.0, 6.0));
        m.add_outline(2, &rect(8.0, 0.0, 12.0, 10.0));
        let gate = m.intersect(&[1, 2], 99);
        let regions = gate.regions(99);
        assert_eq!(regions.len(), 1);
        let b = regions[0].as_rect().unwrap();
        assert!(b.min.approx_eq(&Point::new(8.0, 4.0), 1e-9));
        assert!(b.max.approx_eq(&Point::new(12.0, 6.0), 1e-9));
        assert!(m.intersect(&[1, 7], 99).is_empty());
    }
}
