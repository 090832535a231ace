use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing layout coordinates.
pub const EPSILON: f64 = 1e-9;

/// A 2D point in layout coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn dot(&self, other: &Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the cross product of two vectors.
    pub fn cross(&self, other: &Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector in the same direction, or `None` for the zero vector.
    pub fn unit(&self) -> Option<Point> {
        let len = self.length();
        if len <= EPSILON {
            None
        } else {
            Some(Point::new(self.x / len, self.y / len))
        }
    }

    /// The vector rotated by +90 degrees.
    pub fn perp(&self) -> Point {
        Point::new(-self.y, self.x)
    }

    pub fn approx_eq(&self, other: &Point, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Build a box from any two opposite corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min: Point::new(x1.min(x2), y1.min(y2)),
            max: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    /// Box of the given size centered on a point.
    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self::from_corners(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_bbox(&self, other: &BBox) -> bool {
        other.min.x >= self.min.x - EPSILON
            && other.max.x <= self.max.x + EPSILON
            && other.min.y >= self.min.y - EPSILON
            && other.max.y <= self.max.y + EPSILON
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Grow (or shrink, for negative amounts) each side independently.
    pub fn expand(&self, dx: f64, dy: f64) -> Self {
        Self::from_corners(
            self.min.x - dx,
            self.min.y - dy,
            self.max.x + dx,
            self.max.y + dy,
        )
    }

    /// Counter-clockwise corner outline starting at the lower-left corner.
    pub fn outline(&self) -> Vec<Point> {
        vec![
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }
}

/// A rectangle defined by lower-left and upper-right corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub layer_id: crate::LayerId,
    pub lower_left: Point,
    pub upper_right: Point,
}

impl Rect {
    pub fn new(layer_id: crate::LayerId, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            layer_id,
            lower_left: Point::new(x1.min(x2), y1.min(y2)),
            upper_right: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(self.lower_left, self.upper_right)
    }

    pub fn width(&self) -> f64 {
        self.upper_right.x - self.lower_left.x
    }

    pub fn height(&self) -> f64 {
        self.upper_right.y - self.lower_left.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        self.bbox().contains_point(p)
    }
}

/// A polygon defined by an outer boundary and optional holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub layer_id: crate::LayerId,
    pub vertices: Vec<Point>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(layer_id: crate::LayerId, vertices: Vec<Point>) -> Self {
        Self {
            layer_id,
            vertices,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(mut self, holes: Vec<Vec<Point>>) -> Self {
        self.holes = holes;
        self
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Area of the outline minus the area of the holes.
    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_area(h).abs()).sum();
        ring_area(&self.vertices).abs() - holes
    }

    /// True if every edge is horizontal or vertical.
    pub fn is_manhattan(&self) -> bool {
        is_manhattan_ring(&self.vertices) && self.holes.iter().all(|h| is_manhattan_ring(h))
    }
}

/// Signed shoelace area of a closed ring (counter-clockwise is positive).
pub fn ring_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.cross(&b);
    }
    sum / 2.0
}

pub fn is_manhattan_ring(ring: &[Point]) -> bool {
    (0..ring.len()).all(|i| {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        (a.x - b.x).abs() <= EPSILON || (a.y - b.y).abs() <= EPSILON
    })
}

/// A path (wire) defined by a centerline and width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub layer_id: crate::LayerId,
    pub points: Vec<Point>,
    pub width: f64,
    /// Ends extend by half the width past the first and last point.
    #[serde(default)]
    pub extended: bool,
}

impl Path {
    pub fn new(layer_id: crate::LayerId, points: Vec<Point>, width: f64) -> Self {
        Self {
            layer_id,
            points,
            width,
            extended: false,
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        let half_w = self.width / 2.0;
        let expanded: Vec<Point> = self
            .points
            .iter()
            .flat_map(|p| {
                vec![
                    Point::new(p.x - half_w, p.y - half_w),
                    Point::new(p.x + half_w, p.y + half_w),
                ]
            })
            .collect();
        BBox::from_points(&expanded)
    }

    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// One quadrilateral per segment; interior joints are extended so
    /// consecutive segments overlap at the bend.
    pub fn outlines(&self) -> Vec<Vec<Point>> {
        let n = self.points.len();
        let mut out = Vec::new();
        for i in 1..n {
            let head_ext = if i > 1 || self.extended { self.width / 2.0 } else { 0.0 };
            let tail_ext = if i < n - 1 || self.extended { self.width / 2.0 } else { 0.0 };
            if let Some(quad) = segment_outline(
                self.points[i - 1],
                self.points[i],
                self.width,
                head_ext,
                tail_ext,
            ) {
                out.push(quad);
            }
        }
        out
    }
}

/// Outline of a straight span of the given width between two points, each end
/// pushed outward by its extension. Returns `None` for a zero-length span
/// without any extension.
pub fn segment_outline(
    from: Point,
    to: Point,
    width: f64,
    from_ext: f64,
    to_ext: f64,
) -> Option<Vec<Point>> {
    let dir = match (to - from).unit() {
        Some(d) => d,
        None => {
            // a zero-length span still covers a square when extended
            let ext = from_ext.max(to_ext);
            if ext <= EPSILON || width <= EPSILON {
                return None;
            }
            return Some(BBox::centered(from, 2.0 * ext, width).outline());
        }
    };
    let normal = dir.perp() * (width / 2.0);
    let a = from - dir * from_ext;
    let b = to + dir * to_ext;
    Some(vec![a - normal, b - normal, b + normal, a + normal])
}

/// A geometric primitive in the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeomPrimitive {
    Rect(Rect),
    Polygon(Polygon),
    Path(Path),
}

impl GeomPrimitive {
    pub fn bbox(&self) -> Option<BBox> {
        match self {
            GeomPrimitive::Rect(r) => Some(r.bbox()),
            GeomPrimitive::Polygon(p) => p.bbox(),
            GeomPrimitive::Path(p) => p.bbox(),
        }
    }

    pub fn layer_id(&self) -> crate::LayerId {
        match self {
            GeomPrimitive::Rect(r) => r.layer_id,
            GeomPrimitive::Polygon(p) => p.layer_id,
            GeomPrimitive::Path(p) => p.layer_id,
        }
    }

    /// Outer boundaries making up the primitive. Polygon holes are returned
    /// separately by [`GeomPrimitive::holes`].
    pub fn outlines(&self) -> Vec<Vec<Point>> {
        match self {
            GeomPrimitive::Rect(r) => vec![r.bbox().outline()],
            GeomPrimitive::Polygon(p) => vec![p.vertices.clone()],
            GeomPrimitive::Path(p) => p.outlines(),
        }
    }

    pub fn holes(&self) -> &[Vec<Point>] {
        match self {
            GeomPrimitive::Polygon(p) => &p.holes,
            _ => &[],
        }
    }

    /// The same shape moved onto another layer.
    pub fn with_layer(mut self, layer: crate::LayerId) -> Self {
        match &mut self {
            GeomPrimitive::Rect(r) => r.layer_id = layer,
            GeomPrimitive::Polygon(p) => p.layer_id = layer,
            GeomPrimitive::Path(p) => p.layer_id = layer,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_rect_area() {
        let r = Rect::new(0, 0.0, 0.0, 10.0, 5.0);
        assert!((r.area() - 50.0).abs() < 1e-10);
    }

    #[test]
    fn test_bbox_intersection() {
        let a = BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let b = BBox::new(Point::new(5.0, 5.0), Point::new(15.0, 15.0));
        let c = BBox::new(Point::new(20.0, 20.0), Point::new(30.0, 30.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_polygon_area_with_hole() {
        let outer = BBox::from_corners(0.0, 0.0, 10.0, 10.0).outline();
        let hole = BBox::from_corners(2.0, 2.0, 4.0, 4.0).outline();
        let poly = Polygon::new(1, outer).with_holes(vec![hole]);
        assert!((poly.area() - 96.0).abs() < 1e-10);
        assert!(poly.is_manhattan());
    }

    #[test]
    fn test_segment_outline_extension() {
        let quad = segment_outline(Point::new(1.0, 1.0), Point::new(9.0, 1.0), 2.0, 1.0, 1.0)
            .unwrap();
        let bb = BBox::from_points(&quad).unwrap();
        assert!((bb.min.x - 0.0).abs() < 1e-10);
        assert!((bb.max.x - 10.0).abs() < 1e-10);
        assert!((bb.height() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_path_outlines_overlap_at_bend() {
        let path = Path::new(
            0,
            vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)],
            2.0,
        );
        let outlines = path.outlines();
        assert_eq!(outlines.len(), 2);
        let first = BBox::from_points(&outlines[0]).unwrap();
        assert!((first.max.x - 11.0).abs() < 1e-10);
        assert!((first.min.x - 0.0).abs() < 1e-10);
    }
}
