//! Small planar helpers shared by the recognizers.

use layex_core::cell::{normalize_degrees, sin_cos_degrees};
use layex_core::geometry::EPSILON;
use layex_core::{BBox, Point};

/// Intersection of two infinite lines given by a point and a direction.
pub fn line_intersection(a: Point, da: Point, b: Point, db: Point) -> Option<Point> {
    let denom = da.cross(&db);
    if denom.abs() <= EPSILON {
        return None;
    }
    let t = (b - a).cross(&db) / denom;
    Some(a + da * t)
}

/// Foot of the perpendicular from `p` onto the line through `a` along unit `dir`.
pub fn project_onto_line(p: Point, a: Point, dir: Point) -> Point {
    a + dir * (p - a).dot(&dir)
}

/// Signed position of `p` along the line through `a` with unit direction `dir`.
pub fn position_along(p: Point, a: Point, dir: Point) -> f64 {
    (p - a).dot(&dir)
}

/// Angle of a direction in degrees on `[0, 360)`, exact for axis directions.
pub fn angle_degrees(dir: Point) -> f64 {
    if dir.y.abs() <= EPSILON {
        return if dir.x >= 0.0 { 0.0 } else { 180.0 };
    }
    if dir.x.abs() <= EPSILON {
        return if dir.y > 0.0 { 90.0 } else { 270.0 };
    }
    normalize_degrees(dir.y.atan2(dir.x).to_degrees())
}

pub fn rotate_about(p: Point, about: Point, degrees: f64) -> Point {
    let (s, c) = sin_cos_degrees(degrees);
    let d = p - about;
    Point::new(about.x + d.x * c - d.y * s, about.y + d.x * s + d.y * c)
}

/// Outline of a box rotated about a center point.
pub fn rotated_outline(bbox: &BBox, about: Point, degrees: f64) -> Vec<Point> {
    if degrees == 0.0 {
        return bbox.outline();
    }
    bbox.outline()
        .into_iter()
        .map(|p| rotate_about(p, about, degrees))
        .collect()
}

/// True if the direction is horizontal or vertical.
pub fn is_axis_aligned(dir: Point) -> bool {
    dir.x.abs() <= EPSILON || dir.y.abs() <= EPSILON
}
